// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/frame.rs - 帧与模型输入张量
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

use std::time::Duration;

use image::{RgbImage, imageops::FilterType};

const RGB_CHANNELS: usize = 3;

/// 输入源产生的一帧图像
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据（方向校正由输入源负责）
  pub image: RgbImage,
  /// 帧索引
  pub index: u64,
  /// 相对输入源打开时刻的时间戳
  pub timestamp: Duration,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp: Duration) -> Self {
    Self {
      image,
      index,
      timestamp,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 缩放到模型输入分辨率后的图像，NHWC 排布
#[derive(Debug, Clone)]
pub struct InputTensor {
  pixels: RgbImage,
}

impl InputTensor {
  /// 直接拉伸到 `size × size`，不做 letterbox
  pub fn from_image(image: &RgbImage, size: u32) -> Self {
    let pixels = if image.dimensions() == (size, size) {
      image.clone()
    } else {
      image::imageops::resize(image, size, size, FilterType::Triangle)
    };
    Self { pixels }
  }

  pub fn size(&self) -> u32 {
    self.pixels.width()
  }

  pub fn as_nhwc(&self) -> &[u8] {
    self.pixels.as_raw()
  }

  /// 归一化到 `[0, 1]` 的 NCHW 浮点数据
  pub fn to_normalized_nchw(&self) -> Vec<f32> {
    let plane = (self.pixels.width() * self.pixels.height()) as usize;
    let mut data = vec![0.0f32; plane * RGB_CHANNELS];
    for (idx, pixel) in self.pixels.pixels().enumerate() {
      for c in 0..RGB_CHANNELS {
        data[c * plane + idx] = pixel[c] as f32 / 255.0;
      }
    }
    data
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::Rgb;

  #[test]
  fn resizes_to_square_input() {
    let image = RgbImage::from_pixel(64, 32, Rgb([255, 0, 51]));
    let tensor = InputTensor::from_image(&image, 16);
    assert_eq!(tensor.size(), 16);
    assert_eq!(tensor.as_nhwc().len(), 16 * 16 * 3);
  }

  #[test]
  fn normalizes_channels() {
    let image = RgbImage::from_pixel(2, 2, Rgb([255, 0, 51]));
    let tensor = InputTensor::from_image(&image, 2);

    let nchw = tensor.to_normalized_nchw();
    assert_eq!(nchw.len(), 12);
    assert!(nchw[..4].iter().all(|&v| (v - 1.0).abs() < 1e-6));
    assert!(nchw[4..8].iter().all(|&v| v == 0.0));
    assert!(nchw[8..].iter().all(|&v| (v - 0.2).abs() < 1e-6));
  }
}
