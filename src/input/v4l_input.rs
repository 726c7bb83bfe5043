// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/input/v4l_input.rs - V4L 摄像头输入
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

use std::time::Instant;

use image::RgbImage;
use thiserror::Error;
use tracing::{error, info};
use url::Url;
use v4l::{
  Device, FourCC,
  buffer::Type,
  io::{mmap::Stream, traits::CaptureStream},
  video::Capture,
};

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

const DEFAULT_DEVICE: &str = "/dev/video0";
const RGB24_FOURCC: &[u8; 4] = b"RGB3";
const CAPTURE_BUFFERS: u32 = 4;

#[derive(Error, Debug)]
pub enum V4lInputError {
  #[error("URI schema mismatch")]
  SchemaMismatch,
  #[error("V4L error: {0}")]
  V4lError(#[from] std::io::Error),
  #[error("Unsupported pixel format: {0}")]
  UnsupportedPixelFormat(String),
}

/// 摄像头画面，要求设备支持 RGB24 输出。每次取帧都会阻塞到下一帧就绪，
/// 长时间运行时应配合 [`crate::worker::DetectionWorker`] 丢弃来不及处理的帧。
///
/// 捕获流在打开设备时建立一次，之后每帧复用同一组 mmap 缓冲区。
pub struct V4lInput {
  stream: Stream<'static>,
  width: u32,
  height: u32,
  index: u64,
  opened: Instant,
}

impl FromUrlWithScheme for V4lInput {
  const SCHEME: &'static str = "v4l";
}

impl FromUrl for V4lInput {
  type Error = V4lInputError;

  /// `v4l:///dev/video0`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(V4lInputError::SchemaMismatch);
    }

    let device_path = if url.path().is_empty() || url.path() == "/" {
      DEFAULT_DEVICE
    } else {
      url.path()
    };

    info!("打开摄像头设备: {}", device_path);
    let device = Device::with_path(device_path)?;
    let mut format = device.format()?;
    format.fourcc = FourCC::new(RGB24_FOURCC);
    let format = device.set_format(&format)?;
    if format.fourcc != FourCC::new(RGB24_FOURCC) {
      return Err(V4lInputError::UnsupportedPixelFormat(format.fourcc.to_string()));
    }
    info!("摄像头分辨率: {}x{}", format.width, format.height);

    // 流持有设备句柄的引用计数，设备本身可以随后释放
    let stream = Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS)?;

    Ok(V4lInput {
      stream,
      width: format.width,
      height: format.height,
      index: 0,
      opened: Instant::now(),
    })
  }
}

fn rgb24_frame_len(width: u32, height: u32) -> usize {
  width as usize * height as usize * 3
}

impl V4lInput {
  fn capture_frame(&mut self) -> Result<RgbImage, V4lInputError> {
    let expected = rgb24_frame_len(self.width, self.height);
    let (buf, _meta) = self.stream.next()?;

    if buf.len() < expected {
      return Err(V4lInputError::UnsupportedPixelFormat(format!(
        "缓冲区大小 {} 小于 RGB24 帧大小 {}",
        buf.len(),
        expected
      )));
    }
    RgbImage::from_raw(self.width, self.height, buf[..expected].to_vec()).ok_or_else(|| {
      V4lInputError::UnsupportedPixelFormat("无法构造 RGB 图像".to_string())
    })
  }
}

impl Iterator for V4lInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    match self.capture_frame() {
      Ok(image) => {
        let frame = Frame::new(image, self.index, self.opened.elapsed());
        self.index += 1;
        Some(frame)
      }
      Err(e) => {
        error!("Failed to capture frame: {}", e);
        None
      }
    }
  }
}
