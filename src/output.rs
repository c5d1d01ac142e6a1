// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/output.rs - 推理结果输出
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

use std::io::Write;

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::BgrFrame, shape::PredictionResult};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod save_json_file;
pub use self::save_json_file::{SaveJsonFileError, SaveJsonFileOutput};

mod directory_record;
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError};

/// `stdout:`，每个结果输出一行 JSON
#[derive(Debug, Default)]
pub struct StdoutOutput;

impl FromUrlWithScheme for StdoutOutput {
  const SCHEME: &'static str = "stdout";
}

impl FromUrl for StdoutOutput {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OutputError::SchemeMismatch(url.scheme().to_string()));
    }
    Ok(StdoutOutput)
  }
}

impl Render<BgrFrame, PredictionResult> for StdoutOutput {
  type Error = OutputError;

  fn render_result(&self, _frame: &BgrFrame, result: &PredictionResult) -> Result<(), Self::Error> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, result)?;
    writeln!(stdout)?;
    stdout.flush()?;
    Ok(())
  }
}

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("保存 JSON 文件错误: {0}")]
  SaveJsonFile(#[from] SaveJsonFileError),
  #[error("目录记录输出错误: {0}")]
  DirectoryRecord(#[from] DirectoryRecordOutputError),
  #[error("JSON 错误: {0}")]
  Json(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("不支持的输出方案: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  Stdout(StdoutOutput),
  SaveJsonFile(SaveJsonFileOutput),
  DirectoryRecord(DirectoryRecordOutput),
}

impl Default for OutputWrapper {
  fn default() -> Self {
    OutputWrapper::Stdout(StdoutOutput)
  }
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      StdoutOutput::SCHEME => Ok(OutputWrapper::Stdout(StdoutOutput::from_url(url)?)),
      SaveJsonFileOutput::SCHEME => Ok(OutputWrapper::SaveJsonFile(SaveJsonFileOutput::from_url(
        url,
      )?)),
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecord(
        DirectoryRecordOutput::from_url(url)?,
      )),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render<BgrFrame, PredictionResult> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &BgrFrame, result: &PredictionResult) -> Result<(), Self::Error> {
    match self {
      OutputWrapper::Stdout(output) => output.render_result(frame, result),
      OutputWrapper::SaveJsonFile(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      OutputWrapper::DirectoryRecord(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::shape::Shape;

  #[test]
  fn wrapper_dispatches_by_scheme() {
    let url = Url::parse("stdout:").unwrap();
    assert!(matches!(OutputWrapper::from_url(&url), Ok(OutputWrapper::Stdout(_))));

    let url = Url::parse("folder:///tmp/records?always").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Ok(OutputWrapper::DirectoryRecord(_))
    ));

    let url = Url::parse("rtsp://0.0.0.0:8554/live").unwrap();
    assert!(matches!(
      OutputWrapper::from_url(&url),
      Err(OutputError::SchemeMismatch(_))
    ));
  }

  #[test]
  fn json_file_output_overwrites() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("result.json");
    let url = Url::from_file_path(&path).unwrap();
    let output = OutputWrapper::from_url(&url).unwrap();
    let frame = BgrFrame::zeros(1, 1);

    output.render_result(&frame, &PredictionResult::default()).unwrap();
    let result = PredictionResult::with_shapes(vec![Shape::rectangle("dog", 0.0, 0.0, 2.0, 2.0)]);
    output.render_result(&frame, &result).unwrap();

    let saved: PredictionResult =
      serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(saved, result);
  }
}
