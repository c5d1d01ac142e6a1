// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/input.rs - 图像输入
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

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::BgrFrame};

mod read_image_file;
pub use self::read_image_file::{ImageFileInput, ImageFileInputError};

#[derive(Error, Debug)]
pub enum DecodeImageError {
  #[error("data URI 格式错误: {0}")]
  InvalidDataUri(&'static str),
  #[error("base64 解码失败: {0}")]
  Base64(#[from] base64::DecodeError),
  #[error("图像解码失败: {0}")]
  Image(#[from] image::ImageError),
}

/// 解码 base64 图像，接受裸 base64 字符串或 `data:image/...;base64,` 形式
pub fn decode_base64_image(text: &str) -> Result<BgrFrame, DecodeImageError> {
  let text = text.trim();
  let payload = match text.strip_prefix("data:") {
    Some(rest) => {
      let (header, payload) = rest
        .split_once(',')
        .ok_or(DecodeImageError::InvalidDataUri("缺少 ',' 分隔符"))?;
      if !header.split(';').any(|part| part == "base64") {
        return Err(DecodeImageError::InvalidDataUri("只支持 base64 编码"));
      }
      payload
    }
    None => text,
  };

  let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
  let bytes = STANDARD.decode(compact)?;
  let image = image::load_from_memory(&bytes)?;
  Ok(BgrFrame::from(image))
}

/// `data:image/png;base64,...`
pub struct DataUrlInput {
  frame: Option<BgrFrame>,
}

impl FromUrlWithScheme for DataUrlInput {
  const SCHEME: &'static str = "data";
}

impl FromUrl for DataUrlInput {
  type Error = DecodeImageError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DecodeImageError::InvalidDataUri("URI 方案不是 data"));
    }
    Ok(DataUrlInput {
      frame: Some(decode_base64_image(url.as_str())?),
    })
  }
}

impl Iterator for DataUrlInput {
  type Item = BgrFrame;

  fn next(&mut self) -> Option<Self::Item> {
    self.frame.take()
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("图像文件输入错误: {0}")]
  ImageFile(#[from] ImageFileInputError),
  #[error("data URI 输入错误: {0}")]
  DataUrl(#[from] DecodeImageError),
  #[error("不支持的输入方案: {0}")]
  SchemeMismatch(String),
}

pub enum InputWrapper {
  ImageFile(ImageFileInput),
  DataUrl(DataUrlInput),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ImageFile(ImageFileInput::from_url(url)?)),
      DataUrlInput::SCHEME => Ok(InputWrapper::DataUrl(DataUrlInput::from_url(url)?)),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Iterator for InputWrapper {
  type Item = BgrFrame;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ImageFile(input) => input.next(),
      InputWrapper::DataUrl(input) => input.next(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage};
  use std::io::Cursor;

  fn png_base64() -> String {
    let mut image = RgbImage::new(2, 2);
    image.put_pixel(0, 1, Rgb([255, 0, 0]));
    let mut buffer = Cursor::new(Vec::new());
    image.write_to(&mut buffer, ImageFormat::Png).unwrap();
    STANDARD.encode(buffer.into_inner())
  }

  #[test]
  fn raw_and_data_uri_base64() {
    let raw = png_base64();
    let frame = decode_base64_image(&raw).unwrap();
    assert_eq!(frame.pixel(0, 1), Some([0, 0, 255]));

    let uri = format!("data:image/png;base64,{}", raw);
    assert_eq!(decode_base64_image(&uri).unwrap(), frame);
  }

  #[test]
  fn bad_payloads() {
    assert!(matches!(
      decode_base64_image("data:image/png,abc"),
      Err(DecodeImageError::InvalidDataUri(_))
    ));
    assert!(matches!(
      decode_base64_image("not base64 !!"),
      Err(DecodeImageError::Base64(_))
    ));
    assert!(matches!(
      decode_base64_image(&STANDARD.encode(b"plain text")),
      Err(DecodeImageError::Image(_))
    ));
  }

  #[test]
  fn wrapper_dispatches_by_scheme() {
    let url = Url::parse(&format!("data:image/png;base64,{}", png_base64())).unwrap();
    let mut input = InputWrapper::from_url(&url).unwrap();
    assert!(input.next().is_some());
    assert!(input.next().is_none());

    let url = Url::parse("rtsp://camera/stream").unwrap();
    assert!(matches!(
      InputWrapper::from_url(&url),
      Err(InputError::SchemeMismatch(_))
    ));
  }
}
