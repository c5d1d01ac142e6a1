// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/model/glm46v.rs - GLM-4.6V 定位接口
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

use std::io::Cursor;
use std::time::{Duration, Instant};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::ImageFormat;
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::grounding::{categories, grounding_prompt, parse_grounding_response};
use crate::{
  config::{ModelConfig, Params},
  frame::BgrFrame,
  model::{Model, ModelError, ModelImplementation},
  shape::PredictionResult,
};

const DEFAULT_BASE_URL: &str = "https://open.bigmodel.cn/api/paas/v4";
const DEFAULT_MODEL_NAME: &str = "glm-4.6v";
const DEFAULT_TASK: &str = "grounding";
const DEFAULT_MAX_TOKENS: u64 = 2048;
const DEFAULT_TEMPERATURE: f64 = 0.7;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const API_KEY_ENV: &str = "ZHIPU_API_KEY";

#[derive(Deserialize)]
struct ChatResponse {
  choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
  message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
  #[serde(default)]
  content: Option<String>,
}

fn str_param<'a>(params: &'a Params, name: &str) -> Result<Option<&'a str>, ModelError> {
  match params.get(name) {
    None | Some(Value::Null) => Ok(None),
    Some(Value::String(s)) => Ok(Some(s.as_str())),
    Some(other) => Err(ModelError::InvalidParam {
      name: name.to_string(),
      reason: format!("需要字符串, 实际为 {}", other),
    }),
  }
}

fn number_param(params: &Params, name: &str, default: f64) -> Result<f64, ModelError> {
  match params.get(name) {
    None | Some(Value::Null) => Ok(default),
    Some(value) => value.as_f64().ok_or_else(|| ModelError::InvalidParam {
      name: name.to_string(),
      reason: format!("需要数值, 实际为 {}", value),
    }),
  }
}

/// 通过 OpenAI 兼容的对话接口调用 GLM-4.6V 做开放词表检测
pub struct Glm46v {
  model_id: String,
  model_name: String,
  base_url: String,
  task: String,
  timeout: Duration,
  configured_key: Option<String>,
  session: Option<Session>,
}

struct Session {
  client: Client,
  api_key: String,
}

impl ModelImplementation for Glm46v {
  fn from_config(config: &ModelConfig) -> Result<Self, ModelError> {
    let params = &config.params;
    let seconds = number_param(params, "timeout", DEFAULT_TIMEOUT_SECS as f64)?;
    let timeout = Duration::try_from_secs_f64(seconds)
      .ok()
      .filter(|t| !t.is_zero())
      .ok_or_else(|| ModelError::InvalidParam {
        name: "timeout".to_string(),
        reason: format!("必须为有效的正秒数, 实际为 {}", seconds),
      })?;

    Ok(Self {
      model_id: config.model_id.clone(),
      model_name: str_param(params, "model_name")?
        .unwrap_or(DEFAULT_MODEL_NAME)
        .to_string(),
      base_url: str_param(params, "base_url")?
        .unwrap_or(DEFAULT_BASE_URL)
        .trim_end_matches('/')
        .to_string(),
      task: str_param(params, "task")?.unwrap_or(DEFAULT_TASK).to_string(),
      timeout,
      configured_key: str_param(params, "api_key")?.map(str::to_string),
      session: None,
    })
  }
}

impl Glm46v {
  fn api_key(&self) -> Option<String> {
    self
      .configured_key
      .clone()
      .or_else(|| std::env::var(API_KEY_ENV).ok())
      .filter(|key| !key.trim().is_empty())
  }

  fn encode_image(image: &BgrFrame) -> Result<String, ModelError> {
    let mut buffer = Cursor::new(Vec::new());
    image
      .to_rgb_image()
      .write_to(&mut buffer, ImageFormat::Png)
      .map_err(ModelError::backend)?;
    Ok(format!(
      "data:image/png;base64,{}",
      STANDARD.encode(buffer.into_inner())
    ))
  }

  fn chat(&self, session: &Session, image: &BgrFrame, prompt: &str, params: &Params) -> Result<String, ModelError> {
    let max_tokens = number_param(params, "max_tokens", DEFAULT_MAX_TOKENS as f64)? as u64;
    let temperature = number_param(params, "temperature", DEFAULT_TEMPERATURE)?;
    let thinking = params
      .get("thinking")
      .and_then(Value::as_bool)
      .unwrap_or(false);

    let mut body = json!({
      "model": self.model_name,
      "messages": [{
        "role": "user",
        "content": [
          { "type": "image_url", "image_url": { "url": Self::encode_image(image)? } },
          { "type": "text", "text": prompt },
        ],
      }],
      "max_tokens": max_tokens,
      "temperature": temperature,
    });
    if thinking {
      body["thinking"] = json!({ "type": "enabled" });
    }

    let now = Instant::now();
    let response = session
      .client
      .post(format!("{}/chat/completions", self.base_url))
      .bearer_auth(&session.api_key)
      .json(&body)
      .send()
      .map_err(ModelError::backend)?;

    let status = response.status();
    if !status.is_success() {
      let text = response.text().unwrap_or_default();
      return Err(ModelError::Other(format!(
        "接口返回错误状态 {}: {}",
        status, text
      )));
    }

    let reply: ChatResponse = response.json().map_err(ModelError::backend)?;
    debug!("接口调用耗时: {:.2?}", now.elapsed());

    reply
      .choices
      .into_iter()
      .next()
      .and_then(|choice| choice.message.content)
      .ok_or_else(|| ModelError::Other("接口回复中没有内容".to_string()))
  }

  fn predict_grounding(&self, session: &Session, image: &BgrFrame, params: &Params) -> Result<Value, ModelError> {
    let text_prompt = str_param(params, "text_prompt")?.unwrap_or_default();
    let Some(categories) = categories(text_prompt) else {
      warn!("模型 [{}] 未提供 text_prompt, 返回空结果", self.model_id);
      return Ok(serde_json::to_value(PredictionResult::default())?);
    };

    let reply = self.chat(session, image, &grounding_prompt(&categories), params)?;
    let shapes = parse_grounding_response(&reply, image.width(), image.height());
    info!("模型 [{}] 定位到 {} 个目标", self.model_id, shapes.len());

    Ok(serde_json::to_value(PredictionResult::with_shapes(shapes))?)
  }
}

impl Model for Glm46v {
  fn load(&mut self) -> Result<(), ModelError> {
    let api_key = self
      .api_key()
      .ok_or_else(|| ModelError::MissingParam(format!("api_key (或环境变量 {})", API_KEY_ENV)))?;
    let client = Client::builder()
      .timeout(self.timeout)
      .build()
      .map_err(ModelError::backend)?;

    info!(
      "模型 [{}] 使用接口 {}, 模型名 {}",
      self.model_id, self.base_url, self.model_name
    );
    self.session = Some(Session { client, api_key });
    Ok(())
  }

  fn predict(&self, image: &BgrFrame, params: &Params) -> Result<Value, ModelError> {
    let session = self
      .session
      .as_ref()
      .ok_or_else(|| ModelError::Other("接口客户端尚未初始化".to_string()))?;

    let task = str_param(params, "task")?.unwrap_or(&self.task);
    match task {
      DEFAULT_TASK => self.predict_grounding(session, image, params),
      other => Err(ModelError::InvalidParam {
        name: "task".to_string(),
        reason: format!("不支持的任务 '{}'", other),
      }),
    }
  }

  fn unload(&mut self) -> Result<(), ModelError> {
    self.session = None;
    Ok(())
  }

  // 阻塞客户端可跨线程共享
  fn is_reentrant(&self) -> bool {
    true
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::Map;

  fn config(params: Value) -> ModelConfig {
    let Value::Object(params) = params else {
      panic!("params must be a mapping");
    };
    ModelConfig::new("glm_4_6v_grounding_api", "GLM-4.6V").with_params(params)
  }

  #[test]
  fn defaults_from_empty_params() {
    let model = Glm46v::from_config(&config(json!({}))).unwrap();
    assert_eq!(model.model_name, DEFAULT_MODEL_NAME);
    assert_eq!(model.base_url, DEFAULT_BASE_URL);
    assert_eq!(model.task, DEFAULT_TASK);
    assert!(model.session.is_none());
  }

  #[test]
  fn wrongly_typed_params_are_rejected() {
    let err = Glm46v::from_config(&config(json!({ "model_name": 3 }))).err().unwrap();
    assert!(matches!(err, ModelError::InvalidParam { ref name, .. } if name == "model_name"));

    for timeout in [json!(-1), json!(0), json!(1e30)] {
      let err = Glm46v::from_config(&config(json!({ "timeout": timeout }))).err().unwrap();
      assert!(matches!(err, ModelError::InvalidParam { ref name, .. } if name == "timeout"));
    }

    let model = Glm46v::from_config(&config(json!({ "timeout": 2.5 }))).unwrap();
    assert_eq!(model.timeout, Duration::from_millis(2500));
  }

  #[test]
  fn predict_before_load_fails() {
    let model = Glm46v::from_config(&config(json!({ "api_key": "k" }))).unwrap();
    let frame = BgrFrame::zeros(4, 4);
    assert!(model.predict(&frame, &Map::new()).is_err());
  }

  #[test]
  fn empty_prompt_yields_empty_result() {
    let mut model = Glm46v::from_config(&config(json!({
      "api_key": "k",
      "base_url": "http://127.0.0.1:9/",
    })))
    .unwrap();
    model.load().unwrap();

    let frame = BgrFrame::zeros(4, 4);
    let mut params = Map::new();
    params.insert("text_prompt".to_string(), json!(" . "));
    let value = model.predict(&frame, &params).unwrap();
    assert_eq!(value["shapes"], json!([]));

    params.insert("task".to_string(), json!("caption"));
    assert!(model.predict(&frame, &params).is_err());

    model.unload().unwrap();
    assert!(model.session.is_none());
  }

  #[test]
  fn image_is_sent_as_png_data_uri() {
    let uri = Glm46v::encode_image(&BgrFrame::zeros(2, 2)).unwrap();
    let encoded = uri.strip_prefix("data:image/png;base64,").unwrap();
    let bytes = STANDARD.decode(encoded).unwrap();
    let decoded = image::load_from_memory_with_format(&bytes, ImageFormat::Png).unwrap();
    assert_eq!((decoded.width(), decoded.height()), (2, 2));
  }
}
