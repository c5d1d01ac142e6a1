// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/server.rs - 进程级模型管理
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

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::ser::{Serialize, SerializeMap, Serializer};
use thiserror::Error;
use tracing::{error, info, warn};

use crate::{
  config::{ConfigError, ConfigLoader, ModelConfig, Params},
  frame::BgrFrame,
  lifecycle::{LifecycleError, ManagedModel},
  registry::Registry,
  shape::PredictionResult,
};

/// 单个模型启动失败的原因
#[derive(Error, Debug)]
pub enum LoadError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),
}

#[derive(Error, Debug)]
pub enum ServerError {
  #[error(transparent)]
  Config(#[from] ConfigError),
  #[error("enabled_models 引用了未注册的模型: {}", .0.join(", "))]
  Unregistered(Vec<String>),
  #[error("模型 [{0}] 未在 enabled_models 中启用")]
  NotEnabled(String),
  #[error("模型 [{0}] 未加载")]
  NotLoaded(String),
  #[error("模型 [{model_id}] 加载失败: {source}")]
  Load { model_id: String, source: LoadError },
  #[error(transparent)]
  Lifecycle(#[from] LifecycleError),
}

#[derive(Debug)]
pub struct StartupFailure {
  pub model_id: String,
  pub error: LoadError,
}

/// 两个模型描述文件使用了相同的 display_name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DisplayNameClash {
  pub display_name: String,
  pub model_id: String,
  pub other: String,
}

/// 启动结果汇总
///
/// `display_name_clashes` 覆盖所有成功读取的描述文件，与模型能否加载无关。
#[derive(Debug, Default)]
pub struct StartupReport {
  pub enabled: Vec<String>,
  pub loaded: Vec<String>,
  pub failures: Vec<StartupFailure>,
  pub display_name_clashes: Vec<DisplayNameClash>,
}

impl StartupReport {
  pub fn is_complete(&self) -> bool {
    self.failures.is_empty()
  }
}

/// 全部已加载模型，按 enabled_models 的顺序排列
pub struct ModelServer {
  registry: Arc<Registry>,
  loader: ConfigLoader,
  enabled: Vec<String>,
  models: Vec<Arc<ManagedModel>>,
}

impl ModelServer {
  /// 加载全部启用的模型
  ///
  /// 引用未注册的模型会使整个启动失败；单个模型的配置或加载错误
  /// 只记录在报告中，其余模型继续加载。
  pub fn start(
    registry: Arc<Registry>,
    config_dir: impl Into<PathBuf>,
  ) -> Result<(Self, StartupReport), ServerError> {
    let loader = ConfigLoader::new(config_dir);
    let enabled = loader.enabled_models()?;

    let unregistered: Vec<String> = enabled
      .iter()
      .filter(|id| !registry.contains(id))
      .cloned()
      .collect();
    if !unregistered.is_empty() {
      error!("enabled_models 引用了未注册的模型: {:?}", unregistered);
      return Err(ServerError::Unregistered(unregistered));
    }

    let mut server = ModelServer {
      registry,
      loader,
      enabled: Vec::new(),
      models: Vec::new(),
    };
    let mut report = StartupReport {
      enabled: enabled.clone(),
      ..Default::default()
    };

    if enabled.is_empty() {
      warn!("models.yaml 中未启用任何模型");
      return Ok((server, report));
    }

    info!("正在加载 {} 个启用的模型...", enabled.len());
    let now = Instant::now();
    let mut seen = HashSet::new();
    let mut display_names: HashMap<String, String> = HashMap::new();

    for model_id in enabled {
      if !seen.insert(model_id.clone()) {
        error!("模型 [{}] 在 enabled_models 中重复出现", model_id);
        report.failures.push(StartupFailure {
          error: ConfigError::DuplicateModelId(model_id.clone()).into(),
          model_id,
        });
        continue;
      }
      server.enabled.push(model_id.clone());

      let loaded = server.loader.load(&model_id).map_err(LoadError::from).and_then(|config| {
        let display_name = config.display_name.clone();
        if let Some(other) = display_names.insert(display_name.clone(), model_id.clone()) {
          warn!(
            "display_name '{}' 重复: 模型 [{}] 与 [{}]",
            display_name, model_id, other
          );
          report.display_name_clashes.push(DisplayNameClash {
            display_name,
            model_id: model_id.clone(),
            other,
          });
        }
        server.bring_up(config)
      });

      match loaded {
        Ok(model) => {
          server.models.push(model);
          report.loaded.push(model_id);
        }
        Err(e) => {
          error!("模型 [{}] 加载失败: {}", model_id, e);
          report.failures.push(StartupFailure { model_id, error: e });
        }
      }
    }

    if server.models.is_empty() {
      warn!("没有任何模型加载成功");
    } else {
      info!(
        "成功加载 {}/{} 个模型, 耗时: {:.2?}",
        server.models.len(),
        report.enabled.len(),
        now.elapsed()
      );
    }

    Ok((server, report))
  }

  fn load_one(&self, model_id: &str) -> Result<Arc<ManagedModel>, LoadError> {
    self.bring_up(self.loader.load(model_id)?)
  }

  fn bring_up(&self, config: ModelConfig) -> Result<Arc<ManagedModel>, LoadError> {
    let model = ManagedModel::instantiate(config, &self.registry)?;
    model.activate()?;
    Ok(Arc::new(model))
  }

  pub fn registry(&self) -> &Registry {
    &self.registry
  }

  pub fn get(&self, model_id: &str) -> Result<Arc<ManagedModel>, ServerError> {
    self
      .models
      .iter()
      .find(|m| m.model_id() == model_id)
      .cloned()
      .ok_or_else(|| ServerError::NotLoaded(model_id.to_string()))
  }

  pub fn model_ids(&self) -> Vec<&str> {
    self.models.iter().map(|m| m.model_id()).collect()
  }

  pub fn len(&self) -> usize {
    self.models.len()
  }

  pub fn is_empty(&self) -> bool {
    self.models.is_empty()
  }

  /// 按展示顺序序列化为 `{model_id: metadata}`
  pub fn models_info(&self) -> ModelsInfo<'_> {
    ModelsInfo(&self.models)
  }

  pub fn predict(
    &self,
    model_id: &str,
    image: &BgrFrame,
    params: &Params,
  ) -> Result<PredictionResult, ServerError> {
    Ok(self.get(model_id)?.infer(image, params)?)
  }

  pub fn predict_with_timeout(
    &self,
    model_id: &str,
    image: Arc<BgrFrame>,
    params: Params,
    timeout: Duration,
  ) -> Result<PredictionResult, ServerError> {
    Ok(self.get(model_id)?.infer_with_timeout(image, params, timeout)?)
  }

  /// 重新读取一个模型的配置并重新加载
  ///
  /// 旧实例先卸载；新实例加载失败时该模型不再可用。
  pub fn reload(&mut self, model_id: &str) -> Result<(), ServerError> {
    if !self.enabled.iter().any(|id| id == model_id) {
      return Err(ServerError::NotEnabled(model_id.to_string()));
    }

    if let Some(pos) = self.models.iter().position(|m| m.model_id() == model_id) {
      let old = self.models.remove(pos);
      old.deactivate();
    }

    info!("重新加载模型 [{}]", model_id);
    let model = self.load_one(model_id).map_err(|source| ServerError::Load {
      model_id: model_id.to_string(),
      source,
    })?;

    let order = |id: &str| self.enabled.iter().position(|e| e == id);
    let rank = order(model_id);
    let index = self
      .models
      .iter()
      .take_while(|m| order(m.model_id()) < rank)
      .count();
    self.models.insert(index, model);
    Ok(())
  }

  /// 卸载全部模型，单个模型的卸载失败不会中断其余模型
  pub fn shutdown(&mut self) {
    if self.models.is_empty() {
      return;
    }
    info!("正在卸载全部模型...");
    for model in self.models.drain(..) {
      model.deactivate();
    }
  }
}

impl Drop for ModelServer {
  fn drop(&mut self) {
    self.shutdown();
  }
}

pub struct ModelsInfo<'a>(&'a [Arc<ManagedModel>]);

impl Serialize for ModelsInfo<'_> {
  fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(self.0.len()))?;
    for model in self.0 {
      map.serialize_entry(model.model_id(), &model.metadata())?;
    }
    map.end()
  }
}
