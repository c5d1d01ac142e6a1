// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/lifecycle.rs - 模型生命周期管理
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

//! 状态机: `Unloaded -> Loaded -> Freed`，任意转换失败进入 `Failed`。
//!
//! 实例放在读写锁中：推理持有读锁，加载和卸载持有写锁，
//! 因此卸载会等待进行中的推理结束。不可重入的模型另外由互斥锁串行化推理。

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
  config::{BatchProcessingMode, ModelConfig, Params},
  frame::BgrFrame,
  model::{Model, ModelError},
  normalize::{NormalizeError, normalize},
  registry::{Registry, RegistryError},
  shape::PredictionResult,
  widget::WidgetSpec,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelState {
  Unloaded,
  Loaded,
  Failed,
  Freed,
}

impl fmt::Display for ModelState {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ModelState::Unloaded => "未加载",
      ModelState::Loaded => "已加载",
      ModelState::Failed => "失败",
      ModelState::Freed => "已释放",
    };
    f.write_str(name)
  }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
  #[error(transparent)]
  Registry(#[from] RegistryError),
  #[error("模型 [{model_id}] 实例化失败: {source}")]
  Instantiate { model_id: String, source: ModelError },
  #[error("模型 [{model_id}] 加载失败: {source}")]
  ModelLoad { model_id: String, source: ModelError },
  #[error("模型 [{model_id}] 处于{state}状态, 无法{action}")]
  InvalidState {
    model_id: String,
    state: ModelState,
    action: &'static str,
  },
  #[error("模型 [{model_id}] 推理失败: {source}")]
  Predict { model_id: String, source: ModelError },
  #[error("模型 [{model_id}] 返回的结果无效: {source}")]
  InvalidResponse {
    model_id: String,
    source: NormalizeError,
  },
  #[error("模型 [{model_id}] 推理超时 ({timeout:?})")]
  Timeout { model_id: String, timeout: Duration },
  #[error("模型 [{model_id}] 已有 {pending} 个推理在排队, 拒绝新的超时推理")]
  Busy { model_id: String, pending: usize },
  #[error("无法启动推理线程: {0}")]
  Worker(#[source] std::io::Error),
}

/// 不可重入模型允许同时存在的超时推理线程数
pub const MAX_PENDING_WORKERS: usize = 4;

/// 模型实现中的 panic 视为一次普通失败
fn panicked(action: &str, payload: Box<dyn Any + Send>) -> ModelError {
  let message = payload
    .downcast_ref::<&str>()
    .map(|s| s.to_string())
    .or_else(|| payload.downcast_ref::<String>().cloned())
    .unwrap_or_default();
  ModelError::Other(format!("{}时发生 panic: {}", action, message))
}

/// `/v1/models` 风格的模型元数据
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelMetadata {
  pub display_name: String,
  pub widgets: Vec<WidgetSpec>,
  pub params: Params,
  pub batch_processing_mode: BatchProcessingMode,
}

struct Slot {
  state: ModelState,
  instance: Option<Box<dyn Model>>,
}

/// 持有一个模型实例及其生命周期状态
pub struct ManagedModel {
  config: Arc<ModelConfig>,
  reentrant: bool,
  slot: RwLock<Slot>,
  gate: Mutex<()>,
  /// 超时推理中尚未结束的工作线程数
  pending: AtomicUsize,
}

impl fmt::Debug for ManagedModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ManagedModel")
      .field("model_id", &self.config.model_id)
      .field("reentrant", &self.reentrant)
      .field("state", &self.state())
      .finish_non_exhaustive()
  }
}

impl ManagedModel {
  /// 通过注册表解析实现并构造实例，不加载权重
  pub fn instantiate(config: ModelConfig, registry: &Registry) -> Result<Self, LifecycleError> {
    let entry = registry.resolve(&config.model_id)?;
    debug!("实例化模型 [{}] -> {}", config.model_id, entry.type_name());
    let instance = catch_unwind(AssertUnwindSafe(|| entry.instantiate(&config)))
      .unwrap_or_else(|payload| Err(panicked("实例化", payload)))
      .map_err(|source| LifecycleError::Instantiate {
        model_id: config.model_id.clone(),
        source,
      })?;
    Ok(Self::from_instance(config, instance))
  }

  pub fn from_instance(config: ModelConfig, instance: Box<dyn Model>) -> Self {
    let reentrant = instance.is_reentrant();
    ManagedModel {
      config: Arc::new(config),
      reentrant,
      slot: RwLock::new(Slot {
        state: ModelState::Unloaded,
        instance: Some(instance),
      }),
      gate: Mutex::new(()),
      pending: AtomicUsize::new(0),
    }
  }

  pub fn model_id(&self) -> &str {
    &self.config.model_id
  }

  pub fn config(&self) -> &ModelConfig {
    &self.config
  }

  pub fn state(&self) -> ModelState {
    self.slot.read().state
  }

  pub fn is_reentrant(&self) -> bool {
    self.reentrant
  }

  pub fn metadata(&self) -> ModelMetadata {
    ModelMetadata {
      display_name: self.config.display_name.clone(),
      widgets: self.config.widgets.clone(),
      params: self.config.params.clone(),
      batch_processing_mode: self.config.batch_processing_mode,
    }
  }

  fn invalid_state(&self, state: ModelState, action: &'static str) -> LifecycleError {
    LifecycleError::InvalidState {
      model_id: self.config.model_id.clone(),
      state,
      action,
    }
  }

  /// 加载模型，失败后进入 `Failed` 且不重试
  pub fn activate(&self) -> Result<(), LifecycleError> {
    let mut slot = self.slot.write();
    if slot.state != ModelState::Unloaded {
      return Err(self.invalid_state(slot.state, "加载"));
    }
    let Some(instance) = slot.instance.as_mut() else {
      return Err(self.invalid_state(slot.state, "加载"));
    };

    info!(
      "加载模型 [{}] ({})...",
      self.config.model_id, self.config.display_name
    );
    let now = Instant::now();
    let outcome = catch_unwind(AssertUnwindSafe(|| instance.load()))
      .unwrap_or_else(|payload| Err(panicked("加载", payload)));
    match outcome {
      Ok(()) => {
        slot.state = ModelState::Loaded;
        info!(
          "模型 [{}] 加载完成, 耗时: {:.2?}",
          self.config.model_id,
          now.elapsed()
        );
        Ok(())
      }
      Err(source) => {
        slot.state = ModelState::Failed;
        error!("模型 [{}] 加载失败: {}", self.config.model_id, source);
        Err(LifecycleError::ModelLoad {
          model_id: self.config.model_id.clone(),
          source,
        })
      }
    }
  }

  /// 请求参数覆盖配置参数
  fn merged_params(&self, overrides: &Params) -> Params {
    let mut params = self.config.params.clone();
    for (key, value) in overrides {
      params.insert(key.clone(), value.clone());
    }
    params
  }

  /// 执行推理并归一化结果，仅在 `Loaded` 状态下有效
  pub fn infer(&self, image: &BgrFrame, params: &Params) -> Result<PredictionResult, LifecycleError> {
    let slot = self.slot.read();
    if slot.state != ModelState::Loaded {
      return Err(self.invalid_state(slot.state, "推理"));
    }
    let Some(instance) = slot.instance.as_ref() else {
      return Err(self.invalid_state(slot.state, "推理"));
    };

    let params = self.merged_params(params);
    let _guard = (!self.reentrant).then(|| self.gate.lock());

    let now = Instant::now();
    let raw = catch_unwind(AssertUnwindSafe(|| instance.predict(image, &params)))
      .unwrap_or_else(|payload| Err(panicked("推理", payload)))
      .map_err(|source| LifecycleError::Predict {
        model_id: self.config.model_id.clone(),
        source,
      })?;
    debug!(
      "模型 [{}] 推理完成, 耗时: {:.2?}",
      self.config.model_id,
      now.elapsed()
    );

    normalize(raw).map_err(|source| LifecycleError::InvalidResponse {
      model_id: self.config.model_id.clone(),
      source,
    })
  }

  /// 在独立线程中推理，超时后放弃等待
  ///
  /// 超时不会终止底层计算：实例保持忙碌直到推理自然结束，
  /// 后续请求排在其后。模型提供 `cancel` 时会被调用。
  ///
  /// 不可重入的模型最多保留 [`MAX_PENDING_WORKERS`] 个未结束的工作线程，
  /// 超出时返回 `Busy`，避免被放弃的线程在互斥锁后无限堆积。
  pub fn infer_with_timeout(
    self: &Arc<Self>,
    image: Arc<BgrFrame>,
    params: Params,
    timeout: Duration,
  ) -> Result<PredictionResult, LifecycleError> {
    let pending = self.pending.fetch_add(1, Ordering::SeqCst);
    if !self.reentrant && pending >= MAX_PENDING_WORKERS {
      self.pending.fetch_sub(1, Ordering::SeqCst);
      warn!(
        "模型 [{}] 已有 {} 个推理未结束, 拒绝请求",
        self.config.model_id, pending
      );
      return Err(LifecycleError::Busy {
        model_id: self.config.model_id.clone(),
        pending,
      });
    }

    let (tx, rx) = mpsc::sync_channel(1);
    let model = Arc::clone(self);
    thread::Builder::new()
      .name(format!("infer-{}", self.config.model_id))
      .spawn(move || {
        let result = model.infer(&image, &params);
        model.pending.fetch_sub(1, Ordering::SeqCst);
        let _ = tx.send(result);
      })
      .map_err(|e| {
        self.pending.fetch_sub(1, Ordering::SeqCst);
        LifecycleError::Worker(e)
      })?;

    match rx.recv_timeout(timeout) {
      Ok(result) => result,
      Err(RecvTimeoutError::Timeout) => {
        warn!(
          "模型 [{}] 推理超过 {:.2?}, 放弃等待",
          self.config.model_id, timeout
        );
        if let Some(slot) = self.slot.try_read()
          && let Some(instance) = slot.instance.as_ref()
          && instance.cancel()
        {
          info!("已请求模型 [{}] 中止推理", self.config.model_id);
        }
        Err(LifecycleError::Timeout {
          model_id: self.config.model_id.clone(),
          timeout,
        })
      }
      Err(RecvTimeoutError::Disconnected) => Err(LifecycleError::Predict {
        model_id: self.config.model_id.clone(),
        source: ModelError::Other("推理线程异常退出".to_string()),
      }),
    }
  }

  /// 卸载并释放实例，等待进行中的推理结束
  ///
  /// 可重复调用；卸载失败只记录日志。
  pub fn deactivate(&self) {
    let mut slot = self.slot.write();
    let state = slot.state;
    if let Some(mut instance) = slot.instance.take() {
      if matches!(state, ModelState::Loaded | ModelState::Failed) {
        match catch_unwind(AssertUnwindSafe(|| instance.unload())) {
          Ok(Ok(())) => info!("模型 [{}] 已卸载", self.config.model_id),
          Ok(Err(e)) => error!("模型 [{}] 卸载失败: {}", self.config.model_id, e),
          Err(_) => error!("模型 [{}] 卸载时发生 panic", self.config.model_id),
        }
      }
      drop(instance);
    }
    slot.state = ModelState::Freed;
  }
}

impl Drop for ManagedModel {
  fn drop(&mut self) {
    self.deactivate();
  }
}
