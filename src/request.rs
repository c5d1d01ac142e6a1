// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/request.rs - 推理请求
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

use serde::Deserialize;

use crate::{
  config::Params,
  frame::BgrFrame,
  input::{DecodeImageError, decode_base64_image},
};

/// 客户端提交的一次推理请求
#[derive(Debug, Clone, Deserialize)]
pub struct PredictRequest {
  pub model: String,
  /// base64 图像或 data URI
  pub image: String,
  #[serde(default)]
  pub params: Params,
}

impl PredictRequest {
  pub fn decode_image(&self) -> Result<BgrFrame, DecodeImageError> {
    decode_base64_image(&self.image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn params_default_to_empty() {
    let request: PredictRequest =
      serde_json::from_value(json!({ "model": "yolo11n", "image": "AAAA" })).unwrap();
    assert_eq!(request.model, "yolo11n");
    assert!(request.params.is_empty());

    let request: PredictRequest = serde_json::from_value(json!({
      "model": "glm_4_6v_grounding_api",
      "image": "AAAA",
      "params": { "text_prompt": "cat." },
    }))
    .unwrap();
    assert_eq!(request.params["text_prompt"], json!("cat."));
  }

  #[test]
  fn image_is_required() {
    assert!(serde_json::from_value::<PredictRequest>(json!({ "model": "m" })).is_err());
  }
}
