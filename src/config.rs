// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/config.rs - 模型配置文件加载与校验
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

//! 配置目录布局:
//!
//! ```text
//! configs/
//!   models.yaml              # enabled_models: [yolo11n, ...]
//!   auto_labeling/
//!     yolo11n.yaml           # 单个模型的描述文件
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::widget::{WidgetError, WidgetSpec, validate_widgets};

pub const MODELS_FILE: &str = "models.yaml";
pub const MODEL_CONFIG_DIR: &str = "auto_labeling";

/// 传给模型实现的参数表
pub type Params = Map<String, Value>;

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("非法的模型标识: '{0}'")]
  InvalidModelId(String),
  #[error("模型 [{model_id}] 的配置文件不存在: {}", path.display())]
  NotFound { model_id: String, path: PathBuf },
  #[error("读取配置文件 {} 失败: {source}", path.display())]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("解析配置文件 {} 失败: {source}", path.display())]
  Parse {
    path: PathBuf,
    source: serde_yaml::Error,
  },
  #[error("配置文件为空: {}", path.display())]
  Empty { path: PathBuf },
  #[error("配置文件 {file_stem}.yaml 中的 model_id 为 '{model_id}', 与文件名不一致")]
  Mismatch { file_stem: String, model_id: String },
  #[error("模型 [{0}]: display_name 不能为空")]
  MissingDisplayName(String),
  #[error("模型 [{model_id}]: 无效的 batch_processing_mode '{value}'")]
  InvalidBatchMode { model_id: String, value: String },
  #[error("模型 [{model_id}]: {source}")]
  Widget {
    model_id: String,
    source: WidgetError,
  },
  #[error("模型 [{0}] 在 enabled_models 中重复出现")]
  DuplicateModelId(String),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchProcessingMode {
  #[default]
  Default,
  TextPrompt,
}

impl FromStr for BatchProcessingMode {
  type Err = ();

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "default" => Ok(BatchProcessingMode::Default),
      "text_prompt" => Ok(BatchProcessingMode::TextPrompt),
      _ => Err(()),
    }
  }
}

impl fmt::Display for BatchProcessingMode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      BatchProcessingMode::Default => f.write_str("default"),
      BatchProcessingMode::TextPrompt => f.write_str("text_prompt"),
    }
  }
}

/// 校验通过后的模型描述，加载后不再修改
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelConfig {
  pub model_id: String,
  pub display_name: String,
  pub batch_processing_mode: BatchProcessingMode,
  pub params: Params,
  pub widgets: Vec<WidgetSpec>,
}

impl ModelConfig {
  pub fn new(model_id: impl Into<String>, display_name: impl Into<String>) -> Self {
    ModelConfig {
      model_id: model_id.into(),
      display_name: display_name.into(),
      batch_processing_mode: BatchProcessingMode::Default,
      params: Params::new(),
      widgets: Vec::new(),
    }
  }

  pub fn with_params(mut self, params: Params) -> Self {
    self.params = params;
    self
  }

  pub fn with_widgets(mut self, widgets: Vec<WidgetSpec>) -> Self {
    self.widgets = widgets;
    self
  }

  pub fn with_batch_processing_mode(mut self, mode: BatchProcessingMode) -> Self {
    self.batch_processing_mode = mode;
    self
  }

  /// 校验描述的内部一致性
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.display_name.trim().is_empty() {
      return Err(ConfigError::MissingDisplayName(self.model_id.clone()));
    }
    validate_widgets(&self.widgets).map_err(|source| ConfigError::Widget {
      model_id: self.model_id.clone(),
      source,
    })
  }
}

#[derive(Deserialize)]
struct ModelConfigFile {
  model_id: String,
  display_name: String,
  #[serde(default)]
  batch_processing_mode: Option<serde_yaml::Value>,
  #[serde(default)]
  params: Option<Params>,
  #[serde(default)]
  widgets: Option<Vec<WidgetSpec>>,
}

#[derive(Deserialize, Default)]
struct ModelsFile {
  #[serde(default)]
  enabled_models: Vec<String>,
}

/// 读取配置目录中的 YAML 描述文件
#[derive(Debug, Clone)]
pub struct ConfigLoader {
  root: PathBuf,
}

impl ConfigLoader {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    ConfigLoader { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn model_config_path(&self, model_id: &str) -> PathBuf {
    self
      .root
      .join(MODEL_CONFIG_DIR)
      .join(format!("{}.yaml", model_id))
  }

  /// 读取 `models.yaml` 中启用的模型列表，文件不存在时返回空列表
  pub fn enabled_models(&self) -> Result<Vec<String>, ConfigError> {
    let path = self.root.join(MODELS_FILE);
    if !path.exists() {
      warn!("未找到 {}, 不启用任何模型", path.display());
      return Ok(Vec::new());
    }

    let text = read_text(&path)?;
    let value = parse_yaml(&path, &text)?;
    if value.is_null() {
      return Ok(Vec::new());
    }
    let file: ModelsFile =
      serde_yaml::from_value(value).map_err(|source| ConfigError::Parse { path, source })?;
    Ok(file.enabled_models)
  }

  /// 读取并校验 `auto_labeling/<model_id>.yaml`
  pub fn load(&self, model_id: &str) -> Result<ModelConfig, ConfigError> {
    if model_id.is_empty() || model_id.contains(['/', '\\']) || model_id.starts_with('.') {
      return Err(ConfigError::InvalidModelId(model_id.to_string()));
    }

    let path = self.model_config_path(model_id);
    if !path.is_file() {
      return Err(ConfigError::NotFound {
        model_id: model_id.to_string(),
        path,
      });
    }

    debug!("读取模型配置: {}", path.display());
    let text = read_text(&path)?;
    let value = parse_yaml(&path, &text)?;
    if value.is_null() {
      return Err(ConfigError::Empty { path });
    }
    let file: ModelConfigFile =
      serde_yaml::from_value(value).map_err(|source| ConfigError::Parse { path, source })?;

    if file.model_id != model_id {
      return Err(ConfigError::Mismatch {
        file_stem: model_id.to_string(),
        model_id: file.model_id,
      });
    }

    let batch_processing_mode = match file.batch_processing_mode {
      None | Some(serde_yaml::Value::Null) => BatchProcessingMode::Default,
      Some(serde_yaml::Value::String(value)) => {
        value.parse().map_err(|_| ConfigError::InvalidBatchMode {
          model_id: model_id.to_string(),
          value,
        })?
      }
      Some(other) => {
        return Err(ConfigError::InvalidBatchMode {
          model_id: model_id.to_string(),
          value: yaml_text(&other),
        });
      }
    };

    let config = ModelConfig {
      model_id: file.model_id,
      display_name: file.display_name,
      batch_processing_mode,
      params: file.params.unwrap_or_default(),
      widgets: file.widgets.unwrap_or_default(),
    };
    config.validate()?;
    Ok(config)
  }
}

fn yaml_text(value: &serde_yaml::Value) -> String {
  serde_yaml::to_string(value)
    .map(|text| text.trim_end().to_string())
    .unwrap_or_else(|_| format!("{:?}", value))
}

fn read_text(path: &Path) -> Result<String, ConfigError> {
  std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
    path: path.to_path_buf(),
    source,
  })
}

fn parse_yaml(path: &Path, text: &str) -> Result<serde_yaml::Value, ConfigError> {
  if text.trim().is_empty() {
    return Ok(serde_yaml::Value::Null);
  }
  serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::widget::WidgetError;
  use serde_json::json;
  use tempfile::TempDir;

  fn write_model(dir: &TempDir, file_stem: &str, body: &str) {
    let path = dir.path().join(MODEL_CONFIG_DIR);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join(format!("{}.yaml", file_stem)), body).unwrap();
  }

  #[test]
  fn loads_full_descriptor() {
    let dir = TempDir::new().unwrap();
    write_model(
      &dir,
      "yolo11n",
      r#"
model_id: yolo11n
display_name: YOLO11n (Ultralytics)
batch_processing_mode: text_prompt
params:
  model_path: weights/yolo11n.pt
  device: cpu
widgets:
  - name: edit_conf
    value: 0.25
  - name: button_run
    value: null
"#,
    );

    let config = ConfigLoader::new(dir.path()).load("yolo11n").unwrap();
    assert_eq!(config.model_id, "yolo11n");
    assert_eq!(config.display_name, "YOLO11n (Ultralytics)");
    assert_eq!(config.batch_processing_mode, BatchProcessingMode::TextPrompt);
    assert_eq!(config.params["model_path"], json!("weights/yolo11n.pt"));
    assert_eq!(config.widgets.len(), 2);
    assert_eq!(config.widgets[1].value, None);
  }

  #[test]
  fn defaults_for_optional_fields() {
    let dir = TempDir::new().unwrap();
    write_model(&dir, "plain", "model_id: plain\ndisplay_name: Plain\n");
    let config = ConfigLoader::new(dir.path()).load("plain").unwrap();
    assert_eq!(config.batch_processing_mode, BatchProcessingMode::Default);
    assert!(config.params.is_empty());
    assert!(config.widgets.is_empty());
  }

  #[test]
  fn missing_file() {
    let dir = TempDir::new().unwrap();
    let err = ConfigLoader::new(dir.path()).load("ghost").unwrap_err();
    assert!(matches!(err, ConfigError::NotFound { model_id, .. } if model_id == "ghost"));
  }

  #[test]
  fn rejects_path_like_ids() {
    let dir = TempDir::new().unwrap();
    let loader = ConfigLoader::new(dir.path());
    for id in ["", "../models", "a/b", ".hidden"] {
      assert!(matches!(loader.load(id), Err(ConfigError::InvalidModelId(_))), "{id}");
    }
  }

  #[test]
  fn model_id_must_match_file_stem() {
    let dir = TempDir::new().unwrap();
    write_model(&dir, "yolo11x", "model_id: yolo11n\ndisplay_name: YOLO\n");
    let err = ConfigLoader::new(dir.path()).load("yolo11x").unwrap_err();
    assert!(matches!(
      err,
      ConfigError::Mismatch { file_stem, model_id } if file_stem == "yolo11x" && model_id == "yolo11n"
    ));
  }

  #[test]
  fn missing_widget_default_names_widget() {
    let dir = TempDir::new().unwrap();
    write_model(
      &dir,
      "seg",
      r#"
model_id: seg
display_name: Seg
widgets:
  - name: button_run
  - name: mask_fineness_slider
"#,
    );
    let err = ConfigLoader::new(dir.path()).load("seg").unwrap_err();
    match err {
      ConfigError::Widget { model_id, source } => {
        assert_eq!(model_id, "seg");
        assert_eq!(source, WidgetError::MissingDefault("mask_fineness_slider".to_string()));
      }
      other => panic!("unexpected error: {other}"),
    }
  }

  #[test]
  fn invalid_batch_mode() {
    let dir = TempDir::new().unwrap();
    write_model(
      &dir,
      "vlm",
      "model_id: vlm\ndisplay_name: VLM\nbatch_processing_mode: streaming\n",
    );
    let err = ConfigLoader::new(dir.path()).load("vlm").unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBatchMode { value, .. } if value == "streaming"));

    for (raw, rendered) in [("1", "1"), ("true", "true"), ("[text_prompt]", "- text_prompt")] {
      write_model(
        &dir,
        "vlm",
        &format!("model_id: vlm\ndisplay_name: VLM\nbatch_processing_mode: {raw}\n"),
      );
      let err = ConfigLoader::new(dir.path()).load("vlm").unwrap_err();
      assert!(
        matches!(err, ConfigError::InvalidBatchMode { ref value, .. } if value == rendered),
        "{raw}: {err:?}"
      );
    }
  }

  #[test]
  fn empty_and_malformed_files() {
    let dir = TempDir::new().unwrap();
    write_model(&dir, "empty", "  \n");
    write_model(&dir, "broken", "model_id: [unterminated\n");
    write_model(&dir, "nameless", "model_id: nameless\n");
    let loader = ConfigLoader::new(dir.path());
    assert!(matches!(loader.load("empty"), Err(ConfigError::Empty { .. })));
    assert!(matches!(loader.load("broken"), Err(ConfigError::Parse { .. })));
    assert!(matches!(loader.load("nameless"), Err(ConfigError::Parse { .. })));
  }

  #[test]
  fn enabled_models_order_and_absence() {
    let dir = TempDir::new().unwrap();
    let loader = ConfigLoader::new(dir.path());
    assert!(loader.enabled_models().unwrap().is_empty());

    std::fs::write(
      dir.path().join(MODELS_FILE),
      "enabled_models:\n  - yolo11s\n  - yolo11n\n  - qwen3vl_caption_transformers\n",
    )
    .unwrap();
    assert_eq!(
      loader.enabled_models().unwrap(),
      vec!["yolo11s", "yolo11n", "qwen3vl_caption_transformers"]
    );
  }
}
