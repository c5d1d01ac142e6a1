// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/widget.rs - 界面控件定义与校验
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

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

const TRIGGER_PREFIX: &str = "button_";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WidgetError {
  #[error("控件 '{0}' 重复定义")]
  Duplicate(String),
  #[error("控件 '{0}' 需要默认值")]
  MissingDefault(String),
  #[error("控件 '{widget}' 的值无效: {reason}")]
  InvalidValue { widget: String, reason: String },
  #[error("控件 '{widget}' 需要同时配置 '{required}'")]
  MissingCompanion { widget: String, required: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
  /// 无状态的动作按钮
  Trigger,
  /// 绑定到可编辑参数的控件
  Parameter,
}

/// 一个绑定到配置值的界面控件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetSpec {
  pub name: String,
  #[serde(default)]
  pub value: Option<Value>,
}

impl WidgetSpec {
  pub fn new(name: impl Into<String>, value: Option<Value>) -> Self {
    WidgetSpec {
      name: name.into(),
      value,
    }
  }

  pub fn kind(&self) -> WidgetKind {
    if self.name.starts_with(TRIGGER_PREFIX) {
      WidgetKind::Trigger
    } else {
      WidgetKind::Parameter
    }
  }

  fn check_value(&self) -> Result<(), WidgetError> {
    let Some(rule) = ValueRule::for_widget(&self.name) else {
      return Ok(());
    };
    let Some(value) = &self.value else {
      return Ok(());
    };
    rule.check(value).map_err(|reason| WidgetError::InvalidValue {
      widget: self.name.clone(),
      reason,
    })
  }
}

/// 已知控件的取值规则
#[derive(Debug, Clone, Copy)]
enum ValueRule {
  Number { min: f64, max: f64 },
  Integer { min: i64, max: i64 },
  Bool,
}

impl ValueRule {
  fn for_widget(name: &str) -> Option<ValueRule> {
    match name {
      "edit_conf" | "edit_iou" => Some(ValueRule::Number { min: 0.0, max: 1.0 }),
      "mask_fineness_slider" => Some(ValueRule::Integer { min: 1, max: 100 }),
      "toggle_preserve_existing_annotations" => Some(ValueRule::Bool),
      _ => None,
    }
  }

  fn check(self, value: &Value) -> Result<(), String> {
    match self {
      ValueRule::Number { min, max } => {
        let v = value
          .as_f64()
          .ok_or_else(|| format!("需要数值, 实际为 {}", value))?;
        if !(min..=max).contains(&v) {
          return Err(format!("{} 超出范围 [{}, {}]", v, min, max));
        }
      }
      ValueRule::Integer { min, max } => {
        let v = value
          .as_i64()
          .ok_or_else(|| format!("需要整数, 实际为 {}", value))?;
        if !(min..=max).contains(&v) {
          return Err(format!("{} 超出范围 [{}, {}]", v, min, max));
        }
      }
      ValueRule::Bool => {
        if !value.is_boolean() {
          return Err(format!("需要布尔值, 实际为 {}", value));
        }
      }
    }
    Ok(())
  }
}

/// 校验一个模型配置中的全部控件
pub fn validate_widgets(widgets: &[WidgetSpec]) -> Result<(), WidgetError> {
  let mut names = HashSet::new();
  for widget in widgets {
    if !names.insert(widget.name.as_str()) {
      return Err(WidgetError::Duplicate(widget.name.clone()));
    }
  }

  // 文本输入框依赖发送按钮
  if names.contains("edit_text") && !names.contains("button_send") {
    return Err(WidgetError::MissingCompanion {
      widget: "edit_text".to_string(),
      required: "button_send".to_string(),
    });
  }

  for widget in widgets {
    if widget.kind() == WidgetKind::Parameter && widget.value.is_none() {
      return Err(WidgetError::MissingDefault(widget.name.clone()));
    }
    widget.check_value()?;
  }

  Ok(())
}
