// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/output/save_image_file.rs - 保存图像文件
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

use std::path::PathBuf;

use image::RgbImage;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError},
  },
};

/// 把标注后的画面写入单个文件，每次覆盖。`image:///out.png?font=/path/font.ttf`
pub struct SaveImageFileOutput {
  path: PathBuf,
  draw: Draw,
}

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

impl FromUrlWithScheme for SaveImageFileOutput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(SaveImageFileError::SchemeMismatch(format!(
        "期望保存方式 '{}', 实际保存方式 '{}'",
        Self::SCHEME,
        uri.scheme()
      )));
    }

    let draw = match uri.query_pairs().find(|(k, _)| k == "font") {
      Some((_, font)) => Draw::with_font_file(&*font)?,
      None => Draw::default(),
    };

    Ok(SaveImageFileOutput {
      path: PathBuf::from(uri.path()),
      draw,
    })
  }
}

impl SaveImageFileOutput {
  fn save_image(&self, image: &RgbImage) -> Result<(), SaveImageFileError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(&self.path)?;
    info!("保存图像到文件: {}", self.path.display());

    Ok(())
  }
}

impl Render<Frame, DetectResult> for SaveImageFileOutput {
  type Error = SaveImageFileError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut image = frame.image.clone();
    self.draw.draw_detections(&mut image, result);
    self.save_image(&image)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DetectOutcome;
  use std::time::Duration;

  #[test]
  fn creates_parent_directories() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested/out.png");
    let url = Url::parse(&format!("image://{}", path.display())).unwrap();
    let output = SaveImageFileOutput::from_url(&url).unwrap();

    let frame = Frame::new(RgbImage::new(6, 4), 0, Duration::ZERO);
    let result = DetectResult {
      outcome: DetectOutcome::Empty,
      input_size: 8,
    };
    output.render_result(&frame, &result).unwrap();

    let saved = image::open(&path).unwrap();
    assert_eq!((saved.width(), saved.height()), (6, 4));
  }

  #[test]
  fn missing_font_is_an_error() {
    let url = Url::parse("image:///tmp/out.png?font=/nonexistent/font.ttf").unwrap();
    assert!(matches!(
      SaveImageFileOutput::from_url(&url),
      Err(SaveImageFileError::DrawError(DrawError::IoError(_)))
    ));
  }
}
