// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/model/grounding.rs - 视觉语言模型定位结果解析
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
use tracing::{debug, warn};

use crate::shape::Shape;

const BOX_BEGIN: &str = "<|begin_of_box|>";
const BOX_END: &str = "<|end_of_box|>";
/// 模型输出的坐标归一化到 [0, 1000]
const GROUNDING_SCALE: f64 = 1000.0;
const DEFAULT_LABEL: &str = "object";

/// "cat. dog." -> "cat, dog"
pub fn categories(text_prompt: &str) -> Option<String> {
  let list: Vec<&str> = text_prompt
    .split('.')
    .map(str::trim)
    .filter(|c| !c.is_empty())
    .collect();
  (!list.is_empty()).then(|| list.join(", "))
}

pub fn grounding_prompt(categories: &str) -> String {
  format!(
    "Identify all instances of the specified target categories {categories} in the image. \
     Return the results in valid JSON format as a list, where each element is a dictionary \
     with keys \"label\" and \"bbox_2d\". The \"label\" value must be one of the class names from \
     the input list {categories}, and \"bbox_2d\" must be a list of four integers [x1, y1, x2, y2] \
     representing the bounding box coordinates. For example: [{{\"label\": \"cat\", \"bbox_2d\": [1,2,3,4]}}, \
     {{\"label\": \"dog\", \"bbox_2d\": [5,6,7,8]}}]"
  )
}

/// 标记 `<|begin_of_box|>` 与 `<|end_of_box|>` 之间的内容
fn boxed(text: &str) -> Option<&str> {
  let begin = text.find(BOX_BEGIN)? + BOX_BEGIN.len();
  let end = text.find(BOX_END)?;
  (begin <= end).then(|| text[begin..end].trim())
}

/// 第一个 `[` 到最后一个 `]`
fn bracketed(text: &str) -> Option<&str> {
  let start = text.find('[')?;
  let end = text.rfind(']')?;
  (end > start).then(|| &text[start..=end])
}

/// 去掉 ```json 代码块包裹
fn strip_fence(text: &str) -> &str {
  let Some(start) = text.find("```json") else {
    return text;
  };
  let body = &text[start + "```json".len()..];
  match body.find("```") {
    Some(end) => body[..end].trim(),
    None => body.trim(),
  }
}

fn parse_boxes(text: &str) -> Option<Value> {
  if let Ok(value) = serde_json::from_str(text) {
    return Some(value);
  }
  // 单引号风格的列表
  serde_json::from_str(&text.replace('\'', "\"")).ok()
}

/// 被截断的列表：保留到最后一个完整对象
fn repair_truncated(text: &str) -> Option<Value> {
  let start = text.find('[')?;
  let end = text.rfind('}')?;
  if end < start {
    return None;
  }
  serde_json::from_str(&format!("{}]", &text[start..=end])).ok()
}

fn locate_boxes(response: &str) -> Option<Value> {
  let text = strip_fence(response.trim());
  if let Some(value) = boxed(text).and_then(parse_boxes) {
    return Some(value);
  }
  parse_boxes(text)
    .or_else(|| bracketed(text).and_then(parse_boxes))
    .or_else(|| repair_truncated(text))
}

/// 解析定位回复，返回缩放到图像尺寸的矩形
pub fn parse_grounding_response(response: &str, width: u32, height: u32) -> Vec<Shape> {
  debug!("定位回复: {}", response);

  let Some(value) = locate_boxes(response) else {
    warn!("无法解析定位回复");
    return Vec::new();
  };
  let items = match value {
    Value::Array(items) => items,
    other => vec![other],
  };

  let (w, h) = (width as f64, height as f64);
  items
    .iter()
    .filter_map(|item| {
      let bbox = item.get("bbox_2d")?.as_array()?;
      if bbox.len() != 4 {
        return None;
      }
      let coords: Vec<f64> = bbox.iter().map(Value::as_f64).collect::<Option<_>>()?;
      let label = item
        .get("label")
        .and_then(Value::as_str)
        .filter(|l| !l.trim().is_empty())
        .unwrap_or(DEFAULT_LABEL);

      let x1 = (coords[0] / GROUNDING_SCALE * w).trunc();
      let y1 = (coords[1] / GROUNDING_SCALE * h).trunc();
      let x2 = (coords[2] / GROUNDING_SCALE * w).trunc();
      let y2 = (coords[3] / GROUNDING_SCALE * h).trunc();

      Some(Shape::rectangle(
        label,
        x1.min(x2),
        y1.min(y2),
        x1.max(x2),
        y1.max(y2),
      ))
    })
    .collect()
}
