// 该文件是 Biaozhu （标注服务） 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{DynamicImage, Rgb, RgbImage};
use thiserror::Error;

const BGR_CHANNELS: usize = 3;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
  #[error("数据长度不匹配: 期望长度 {expected}, 实际长度 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// HWC 排列、BGR 通道顺序的像素缓冲
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl BgrFrame {
  pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self, FrameError> {
    let expected = BGR_CHANNELS * width as usize * height as usize;
    if data.len() != expected {
      return Err(FrameError::LengthMismatch {
        expected,
        actual: data.len(),
      });
    }

    Ok(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn zeros(width: u32, height: u32) -> Self {
    let size = BGR_CHANNELS * width as usize * height as usize;
    Self {
      width,
      height,
      data: vec![0u8; size].into_boxed_slice(),
    }
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn channels(&self) -> usize {
    BGR_CHANNELS
  }

  pub fn as_bytes(&self) -> &[u8] {
    &self.data
  }

  /// (x, y) 处的 [b, g, r]
  pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
    if x >= self.width || y >= self.height {
      return None;
    }
    let index = (y as usize * self.width as usize + x as usize) * BGR_CHANNELS;
    Some([self.data[index], self.data[index + 1], self.data[index + 2]])
  }

  pub fn to_rgb_image(&self) -> RgbImage {
    RgbImage::from_fn(self.width, self.height, |x, y| {
      let index = (y as usize * self.width as usize + x as usize) * BGR_CHANNELS;
      Rgb([self.data[index + 2], self.data[index + 1], self.data[index]])
    })
  }
}

impl AsRef<[u8]> for BgrFrame {
  fn as_ref(&self) -> &[u8] {
    &self.data
  }
}

impl From<&RgbImage> for BgrFrame {
  fn from(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut data = Vec::with_capacity(BGR_CHANNELS * width as usize * height as usize);
    for pixel in image.pixels() {
      let [r, g, b] = pixel.0;
      data.extend_from_slice(&[b, g, r]);
    }

    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }
}

impl From<RgbImage> for BgrFrame {
  fn from(image: RgbImage) -> Self {
    BgrFrame::from(&image)
  }
}

impl From<DynamicImage> for BgrFrame {
  fn from(image: DynamicImage) -> Self {
    BgrFrame::from(image.into_rgb8())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn length_is_checked() {
    assert_eq!(
      BgrFrame::new(2, 2, vec![0; 11]),
      Err(FrameError::LengthMismatch {
        expected: 12,
        actual: 11
      })
    );
    assert!(BgrFrame::new(2, 2, vec![0; 12]).is_ok());
  }

  #[test]
  fn rgb_is_swapped_to_bgr_and_back() {
    let mut image = RgbImage::new(2, 1);
    image.put_pixel(0, 0, Rgb([10, 20, 30]));
    image.put_pixel(1, 0, Rgb([200, 100, 50]));

    let frame = BgrFrame::from(&image);
    assert_eq!(frame.pixel(0, 0), Some([30, 20, 10]));
    assert_eq!(frame.pixel(1, 0), Some([50, 100, 200]));
    assert_eq!(frame.pixel(2, 0), None);
    assert_eq!(frame.to_rgb_image(), image);
  }
}
