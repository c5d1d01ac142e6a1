// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Utc};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;
use url::Url;

use super::save_json_file::{SaveJsonFileError, write_json};
use crate::{
  FromUrl, FromUrlWithScheme, frame::BgrFrame, output::Render, shape::PredictionResult,
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("路径解码失败: {0}")]
  InvalidPath(#[from] std::string::FromUtf8Error),
  #[error("图像错误: {0}")]
  Image(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("结果写入错误: {0}")]
  Json(#[from] SaveJsonFileError),
}

/// `folder:///records?always&image`
///
/// 按 `年/月/日` 分目录保存结果，文件名为 `时-分-秒-序号`。
/// 默认跳过空结果，`always` 时全部保存；`image` 时同时保存原图。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  frame_counter: Mutex<u16>,
  always: bool,
  with_image: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let always = uri.query_pairs().any(|(k, _)| k == "always");
    let with_image = uri.query_pairs().any(|(k, _)| k == "image");

    Ok(DirectoryRecordOutput {
      directory: PathBuf::from(urlencoding::decode(uri.path())?.into_owned()),
      frame_counter: Mutex::new(0),
      always,
      with_image,
    })
  }
}

impl DirectoryRecordOutput {
  pub fn directory(&self) -> &Path {
    &self.directory
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self.frame_counter.lock();
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn record_stem(&self, now: DateTime<Utc>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<BgrFrame, PredictionResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &BgrFrame, result: &PredictionResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      debug!("结果为空, 跳过记录");
      return Ok(());
    }

    let stem = self.record_stem(Utc::now())?;
    write_json(&stem.with_extension("json"), result)?;
    if self.with_image {
      frame.to_rgb_image().save(stem.with_extension("png"))?;
    }
    debug!("记录推理结果: {}", stem.display());
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::shape::Shape;

  fn output(dir: &Path, query: &str) -> DirectoryRecordOutput {
    let url = Url::parse(&format!("folder://{}{}", dir.display(), query)).unwrap();
    DirectoryRecordOutput::from_url(&url).unwrap()
  }

  fn files(dir: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut stack = vec![dir.to_path_buf()];
    while let Some(next) = stack.pop() {
      for entry in std::fs::read_dir(next).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          stack.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found.sort();
    found
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = BgrFrame::zeros(2, 2);

    output(dir.path(), "").render_result(&frame, &PredictionResult::default()).unwrap();
    assert!(files(dir.path()).is_empty());

    output(dir.path(), "?always").render_result(&frame, &PredictionResult::default()).unwrap();
    assert_eq!(files(dir.path()).len(), 1);
  }

  #[test]
  fn records_are_date_sharded() {
    let dir = tempfile::tempdir().unwrap();
    let record = output(dir.path(), "?image");
    let result = PredictionResult::with_shapes(vec![Shape::rectangle("cat", 0.0, 0.0, 1.0, 1.0)]);
    record.render_result(&BgrFrame::zeros(2, 2), &result).unwrap();

    let found = files(dir.path());
    assert_eq!(found.len(), 2);
    let json = found.iter().find(|p| p.extension().is_some_and(|e| e == "json")).unwrap();
    let relative = json.strip_prefix(dir.path()).unwrap();
    assert_eq!(relative.components().count(), 4);

    let saved: PredictionResult =
      serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
    assert_eq!(saved, result);
  }
}
