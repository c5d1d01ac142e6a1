// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/normalize.rs - 推理结果归一化
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
use tracing::debug;

use crate::shape::{PredictionResult, Shape, ShapeRule};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum NormalizeError {
  #[error("推理结果必须是映射, 实际为 {0}")]
  NotAMapping(&'static str),
  #[error("推理结果缺少 shapes 字段")]
  MissingShapes,
  #[error("shapes 字段必须是数组, 实际为 {0}")]
  ShapesNotSequence(&'static str),
  #[error("第 {index} 个形状无效: {rule}")]
  InvalidShape { index: usize, rule: ShapeRule },
  #[error("字段 '{key}' 类型错误: 需要 {expected}, 实际为 {actual}")]
  InvalidField {
    key: &'static str,
    expected: &'static str,
    actual: &'static str,
  },
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "bool",
    Value::Number(_) => "number",
    Value::String(_) => "string",
    Value::Array(_) => "array",
    Value::Object(_) => "object",
  }
}

/// 把模型返回的原始映射转换为规范的推理结果
///
/// 任意一个形状不合法都会使整个结果失败；未知字段被丢弃。
pub fn normalize(raw: Value) -> Result<PredictionResult, NormalizeError> {
  let mut map = match raw {
    Value::Object(map) => map,
    other => return Err(NormalizeError::NotAMapping(kind_of(&other))),
  };

  let shapes = match map.remove("shapes") {
    None => return Err(NormalizeError::MissingShapes),
    Some(Value::Array(items)) => items
      .into_iter()
      .enumerate()
      .map(|(index, item)| normalize_shape(index, item))
      .collect::<Result<Vec<_>, _>>()?,
    Some(other) => return Err(NormalizeError::ShapesNotSequence(kind_of(&other))),
  };

  let description = match map.remove("description") {
    None | Some(Value::Null) => String::new(),
    Some(Value::String(text)) => text,
    Some(other) => {
      return Err(NormalizeError::InvalidField {
        key: "description",
        expected: "string",
        actual: kind_of(&other),
      });
    }
  };

  let replace = match map.remove("replace") {
    None | Some(Value::Null) => None,
    Some(Value::Bool(flag)) => Some(flag),
    Some(other) => {
      return Err(NormalizeError::InvalidField {
        key: "replace",
        expected: "bool",
        actual: kind_of(&other),
      });
    }
  };

  if !map.is_empty() {
    debug!("丢弃未知字段: {:?}", map.keys().collect::<Vec<_>>());
  }

  Ok(PredictionResult {
    shapes,
    description,
    replace,
  })
}

fn normalize_shape(index: usize, item: Value) -> Result<Shape, NormalizeError> {
  let shape: Shape = serde_json::from_value(item).map_err(|e| NormalizeError::InvalidShape {
    index,
    rule: ShapeRule::Malformed(e.to_string()),
  })?;
  shape
    .validate()
    .map_err(|rule| NormalizeError::InvalidShape { index, rule })?;
  Ok(shape)
}
