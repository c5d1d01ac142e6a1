// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/output/save_json_file.rs - 推理结果写入 JSON 文件
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

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, frame::BgrFrame, output::Render, shape::PredictionResult,
};

#[derive(Error, Debug)]
pub enum SaveJsonFileError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("路径解码失败: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// `file:///path/to/result.json`，每次推理覆盖写入
pub struct SaveJsonFileOutput {
  path: PathBuf,
}

impl FromUrlWithScheme for SaveJsonFileOutput {
  const SCHEME: &'static str = "file";
}

impl FromUrl for SaveJsonFileOutput {
  type Error = SaveJsonFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveJsonFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    Ok(SaveJsonFileOutput {
      path: PathBuf::from(urlencoding::decode(uri.path())?.into_owned()),
    })
  }
}

impl SaveJsonFileOutput {
  pub fn path(&self) -> &Path {
    &self.path
  }
}

pub(crate) fn write_json(path: &Path, result: &PredictionResult) -> Result<(), SaveJsonFileError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent)?;
  }
  let writer = BufWriter::new(File::create(path)?);
  serde_json::to_writer_pretty(writer, result)?;
  Ok(())
}

impl Render<BgrFrame, PredictionResult> for SaveJsonFileOutput {
  type Error = SaveJsonFileError;

  fn render_result(&self, _frame: &BgrFrame, result: &PredictionResult) -> Result<(), Self::Error> {
    write_json(&self.path, result)?;
    info!("保存推理结果到文件: {}", self.path.display());
    Ok(())
  }
}
