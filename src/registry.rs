// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/registry.rs - 模型注册表
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

//! 注册表分两个阶段：发现阶段通过 [`RegistryBuilder`] 收集注册，
//! 结束后冻结为只读的 [`Registry`]，之后只允许查询。

use std::any::{TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
  config::ModelConfig,
  model::{Constructor, Model, ModelError, ModelImplementation, construct},
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
  #[error("模型标识 '{id}' 已注册为 {existing}, 不能再注册为 {incoming}")]
  DuplicateIdentifier {
    id: String,
    existing: &'static str,
    incoming: &'static str,
  },
  #[error("模型标识 '{0}' 未注册")]
  Unregistered(String),
  #[error("模型标识不能为空")]
  EmptyIdentifier,
}

/// 一个模型标识对应的实现类型
#[derive(Clone, Copy)]
pub struct RegistryEntry {
  type_id: TypeId,
  type_name: &'static str,
  constructor: Constructor,
}

impl RegistryEntry {
  fn of<T: ModelImplementation>() -> Self {
    RegistryEntry {
      type_id: TypeId::of::<T>(),
      type_name: type_name::<T>(),
      constructor: construct::<T>,
    }
  }

  pub fn type_name(&self) -> &'static str {
    self.type_name
  }

  pub fn is<T: 'static>(&self) -> bool {
    self.type_id == TypeId::of::<T>()
  }

  /// 以配置构造实例，此时尚未加载权重
  pub fn instantiate(&self, config: &ModelConfig) -> Result<Box<dyn Model>, ModelError> {
    (self.constructor)(config)
  }
}

impl fmt::Debug for RegistryEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RegistryEntry")
      .field("type_name", &self.type_name)
      .finish_non_exhaustive()
  }
}

#[derive(Debug, Default)]
pub struct RegistryBuilder {
  entries: HashMap<String, RegistryEntry>,
}

impl RegistryBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// 把一个或多个标识绑定到实现 `T`
  ///
  /// 同一标识重复绑定到同一类型是幂等的；绑定到不同类型时整批注册失败，
  /// 不会留下部分注册的标识。
  pub fn register<T: ModelImplementation>(
    &mut self,
    identifiers: &[&str],
  ) -> Result<&mut Self, RegistryError> {
    let entry = RegistryEntry::of::<T>();

    for id in identifiers {
      if id.is_empty() {
        return Err(RegistryError::EmptyIdentifier);
      }
      if let Some(existing) = self.entries.get(*id)
        && existing.type_id != entry.type_id
      {
        return Err(RegistryError::DuplicateIdentifier {
          id: id.to_string(),
          existing: existing.type_name,
          incoming: entry.type_name,
        });
      }
    }

    for id in identifiers {
      debug!("注册模型 [{}] -> {}", id, entry.type_name);
      self.entries.insert(id.to_string(), entry);
    }
    Ok(self)
  }

  pub fn build(self) -> Registry {
    Registry {
      entries: self.entries,
    }
  }
}

/// 冻结后的只读注册表
#[derive(Debug)]
pub struct Registry {
  entries: HashMap<String, RegistryEntry>,
}

impl Registry {
  pub fn resolve(&self, identifier: &str) -> Result<&RegistryEntry, RegistryError> {
    self
      .entries
      .get(identifier)
      .ok_or_else(|| RegistryError::Unregistered(identifier.to_string()))
  }

  pub fn contains(&self, identifier: &str) -> bool {
    self.entries.contains_key(identifier)
  }

  /// 按字典序排列的全部标识
  pub fn identifiers(&self) -> Vec<&str> {
    let mut ids: Vec<&str> = self.entries.keys().map(String::as_str).collect();
    ids.sort_unstable();
    ids
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }
}

/// 发现阶段中执行注册的钩子
pub type Provider = fn(&mut RegistryBuilder) -> Result<(), RegistryError>;

/// 依次执行全部注册钩子，完成后返回冻结的注册表
pub fn discover(providers: &[Provider]) -> Result<Registry, RegistryError> {
  let mut builder = RegistryBuilder::new();
  for provider in providers {
    provider(&mut builder)?;
  }
  let registry = builder.build();
  info!("模型发现完成, 共注册 {} 个模型标识", registry.len());
  Ok(registry)
}

static GLOBAL: OnceLock<Arc<Registry>> = OnceLock::new();

/// 进程级注册表，首次调用时完成内置模型的发现
pub fn global() -> Result<Arc<Registry>, RegistryError> {
  if let Some(registry) = GLOBAL.get() {
    return Ok(registry.clone());
  }
  let registry = Arc::new(discover(&[crate::model::register_builtin])?);
  Ok(GLOBAL.get_or_init(|| registry).clone())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{config::Params, frame::BgrFrame};
  use serde_json::Value;

  struct Detector;
  struct Segmenter;

  macro_rules! dummy_model {
    ($ty:ident) => {
      impl Model for $ty {
        fn load(&mut self) -> Result<(), ModelError> {
          Ok(())
        }
        fn predict(&self, _: &BgrFrame, _: &Params) -> Result<Value, ModelError> {
          Ok(serde_json::json!({ "shapes": [] }))
        }
        fn unload(&mut self) -> Result<(), ModelError> {
          Ok(())
        }
      }

      impl ModelImplementation for $ty {
        fn from_config(_: &ModelConfig) -> Result<Self, ModelError> {
          Ok($ty)
        }
      }
    };
  }

  dummy_model!(Detector);
  dummy_model!(Segmenter);

  #[test]
  fn shared_implementation_and_conflict() {
    let mut builder = RegistryBuilder::new();
    builder.register::<Detector>(&["yolo11n", "yolo11s"]).unwrap();

    let err = builder.register::<Segmenter>(&["yolo11n"]).unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateIdentifier { ref id, .. } if id == "yolo11n"));

    let registry = builder.build();
    assert!(registry.resolve("yolo11n").unwrap().is::<Detector>());
    assert!(registry.resolve("yolo11s").unwrap().is::<Detector>());
  }

  #[test]
  fn reregistering_same_type_is_idempotent() {
    let mut builder = RegistryBuilder::new();
    builder.register::<Detector>(&["yolo11n"]).unwrap();
    builder.register::<Detector>(&["yolo11n"]).unwrap();
    let registry = builder.build();
    assert_eq!(registry.len(), 1);
    assert!(registry.resolve("yolo11n").unwrap().is::<Detector>());
  }

  #[test]
  fn conflicting_batch_registers_nothing() {
    let mut builder = RegistryBuilder::new();
    builder.register::<Detector>(&["taken"]).unwrap();
    assert!(builder.register::<Segmenter>(&["fresh", "taken"]).is_err());
    let registry = builder.build();
    assert!(!registry.contains("fresh"));
  }

  #[test]
  fn unregistered_and_empty_identifiers() {
    let mut builder = RegistryBuilder::new();
    assert_eq!(
      builder.register::<Detector>(&[""]).unwrap_err(),
      RegistryError::EmptyIdentifier
    );
    let registry = builder.build();
    assert_eq!(
      registry.resolve("missing").unwrap_err(),
      RegistryError::Unregistered("missing".to_string())
    );
  }

  #[test]
  fn discover_runs_every_provider() {
    fn detectors(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
      builder.register::<Detector>(&["yolo11n", "yolo11s"])?;
      Ok(())
    }
    fn segmenters(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
      builder.register::<Segmenter>(&["yolo11n_seg"])?;
      Ok(())
    }

    let registry = discover(&[detectors, segmenters]).unwrap();
    assert_eq!(registry.identifiers(), vec!["yolo11n", "yolo11n_seg", "yolo11s"]);
    let entry = registry.resolve("yolo11n_seg").unwrap();
    assert!(entry.instantiate(&ModelConfig::new("yolo11n_seg", "Seg")).is_ok());
  }

  #[test]
  fn discover_propagates_conflicts() {
    fn first(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
      builder.register::<Detector>(&["dup"])?;
      Ok(())
    }
    fn second(builder: &mut RegistryBuilder) -> Result<(), RegistryError> {
      builder.register::<Segmenter>(&["dup"])?;
      Ok(())
    }
    assert!(discover(&[first, second]).is_err());
  }
}
