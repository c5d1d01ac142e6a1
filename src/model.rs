// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/model.rs - 模型能力约定
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

use serde_json::Value;
use thiserror::Error;

use crate::{
  config::{ModelConfig, Params},
  frame::BgrFrame,
  registry::{RegistryBuilder, RegistryError},
};

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("缺少参数: {0}")]
  MissingParam(String),
  #[error("参数 '{name}' 无效: {reason}")]
  InvalidParam { name: String, reason: String },
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("推理后端错误: {0}")]
  Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
  #[error("{0}")]
  Other(String),
}

impl ModelError {
  pub fn backend(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
    ModelError::Backend(err.into())
  }
}

/// 可注册模型需要提供的能力
///
/// `predict` 返回原始映射，由框架统一归一化为 [`crate::shape::PredictionResult`]。
/// 图像为 BGR 通道顺序。
pub trait Model: Send + Sync {
  /// 加载权重等昂贵资源，失败后不会自动重试
  fn load(&mut self) -> Result<(), ModelError>;

  fn predict(&self, image: &BgrFrame, params: &Params) -> Result<Value, ModelError>;

  fn unload(&mut self) -> Result<(), ModelError>;

  /// 为 true 时同一实例允许并发推理
  fn is_reentrant(&self) -> bool {
    false
  }

  /// 请求中止正在进行的推理，返回是否支持
  fn cancel(&self) -> bool {
    false
  }
}

/// 可由配置构造的模型实现
///
/// 多个模型标识可以共享同一实现，实现通过 `config.model_id` 区分行为。
pub trait ModelImplementation: Model + Sized + 'static {
  /// 只保存参数，不分配权重
  fn from_config(config: &ModelConfig) -> Result<Self, ModelError>;
}

pub(crate) type Constructor = fn(&ModelConfig) -> Result<Box<dyn Model>, ModelError>;

pub(crate) fn construct<T: ModelImplementation>(
  config: &ModelConfig,
) -> Result<Box<dyn Model>, ModelError> {
  Ok(Box::new(T::from_config(config)?))
}

pub mod grounding;

#[cfg(feature = "model_glm_4_6v")]
mod glm46v;
#[cfg(feature = "model_glm_4_6v")]
pub use self::glm46v::Glm46v;

/// 注册内置模型实现
#[cfg_attr(not(feature = "model_glm_4_6v"), allow(unused_variables))]
pub fn register_builtin(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
  #[cfg(feature = "model_glm_4_6v")]
  builder.register::<Glm46v>(&["glm_4_6v_grounding_api"])?;

  Ok(())
}
