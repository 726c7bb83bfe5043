// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/output/crop_output.rs - 按检测框裁剪衣物图像
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

use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectResult, Detection},
  output::Render,
};

#[derive(Error, Debug)]
pub enum CropOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 一件衣物的裁剪图与类别名；整帧没有检测结果时类别名为空
#[derive(Debug, Clone)]
pub struct Crop {
  pub image: RgbImage,
  pub label: String,
}

/// 把检测框映射到画面并裁剪；框被限制在画面内，退化的框被跳过。
/// 没有任何可用的框时返回整帧，类别名为空。
pub fn crop_detections(frame: &Frame, result: &DetectResult) -> Vec<Crop> {
  let (w, h) = (frame.width(), frame.height());
  let crops: Vec<Crop> = result
    .rescaled(w, h)
    .iter()
    .filter_map(|det| crop_one(&frame.image, det))
    .collect();

  if crops.is_empty() {
    return vec![Crop {
      image: frame.image.clone(),
      label: String::new(),
    }];
  }
  crops
}

fn crop_one(image: &RgbImage, det: &Detection) -> Option<Crop> {
  let (w, h) = (image.width() as f32, image.height() as f32);
  let clamp = |v: f32, max: f32| if v.is_nan() { 0.0 } else { v.clamp(0.0, max) };
  let left = clamp(det.bbox.left.floor(), w) as u32;
  let top = clamp(det.bbox.top.floor(), h) as u32;
  let right = clamp(det.bbox.right.ceil(), w) as u32;
  let bottom = clamp(det.bbox.bottom.ceil(), h) as u32;

  if right <= left || bottom <= top {
    debug!("跳过画面外或退化的检测框: {:?}", det.bbox);
    return None;
  }

  let image = imageops::crop_imm(image, left, top, right - left, bottom - top).to_image();
  Some(Crop {
    image,
    label: det.label.clone(),
  })
}

/// 标签用于文件名，只保留字母、数字、`-` 与 `_`
fn file_label(label: &str) -> String {
  label
    .chars()
    .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
    .collect()
}

fn crop_file_name(frame_index: u64, n: usize, label: &str) -> String {
  if label.is_empty() {
    format!("{frame_index:06}-{n}.png")
  } else {
    format!("{frame_index:06}-{n}-{}.png", file_label(label))
  }
}

/// `crop:///dir`：每个检测框保存为 `<帧号>-<序号>-<类别>.png`，
/// 没有检测结果的帧整帧保存为 `<帧号>-0.png`
pub struct CropOutput {
  directory: PathBuf,
}

impl FromUrlWithScheme for CropOutput {
  const SCHEME: &'static str = "crop";
}

impl FromUrl for CropOutput {
  type Error = CropOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(CropOutputError::SchemeMismatch(uri.scheme().to_string()));
    }
    let directory = PathBuf::from(uri.path());
    std::fs::create_dir_all(&directory)?;
    info!("裁剪图像保存到: {}", directory.display());
    Ok(CropOutput { directory })
  }
}

impl Render<Frame, DetectResult> for CropOutput {
  type Error = CropOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    for (n, crop) in crop_detections(frame, result).iter().enumerate() {
      let path = self
        .directory
        .join(crop_file_name(frame.index, n, &crop.label));
      crop.image.save(&path)?;
      debug!("保存裁剪图像: {}", path.display());
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, DetectOutcome};
  use image::Rgb;
  use std::time::Duration;

  fn detection(bbox: [f32; 4], label: &str) -> Detection {
    Detection {
      bbox: BoundingBox::new(bbox[0], bbox[1], bbox[2], bbox[3]),
      class_id: 0,
      label: label.to_string(),
      confidence: 0.9,
    }
  }

  fn result(detections: Vec<Detection>) -> DetectResult {
    DetectResult {
      outcome: DetectOutcome::from_detections(detections, Duration::ZERO),
      input_size: 10,
    }
  }

  #[test]
  fn crops_are_rescaled_and_clamped() {
    let image = RgbImage::from_fn(20, 10, |x, _| Rgb([x as u8, 0, 0]));
    let frame = Frame::new(image, 0, Duration::ZERO);
    // 模型空间 10×10，画面 20×10
    let crops = crop_detections(
      &frame,
      &result(vec![
        detection([1.0, 2.0, 4.0, 6.0], "blue"),
        detection([8.0, -3.0, 15.0, 5.0], "white"),
      ]),
    );

    assert_eq!(crops.len(), 2);
    assert_eq!(crops[0].label, "blue");
    assert_eq!(crops[0].image.dimensions(), (6, 4));
    assert_eq!(*crops[0].image.get_pixel(0, 0), Rgb([2, 0, 0]));
    assert_eq!(crops[1].label, "white");
    assert_eq!(crops[1].image.dimensions(), (4, 5));
  }

  #[test]
  fn empty_result_yields_whole_frame_without_label() {
    let frame = Frame::new(RgbImage::new(7, 5), 0, Duration::ZERO);
    let crops = crop_detections(&frame, &result(vec![]));
    assert_eq!(crops.len(), 1);
    assert!(crops[0].label.is_empty());
    assert_eq!(crops[0].image.dimensions(), (7, 5));
  }

  #[test]
  fn boxes_outside_frame_fall_back_to_whole_frame() {
    let frame = Frame::new(RgbImage::new(8, 8), 0, Duration::ZERO);
    let crops = crop_detections(&frame, &result(vec![detection([12.0, 12.0, 15.0, 15.0], "green")]));
    assert_eq!(crops.len(), 1);
    assert!(crops[0].label.is_empty());
  }

  #[test]
  fn writes_one_file_per_detection() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("crop://{}/crops", dir.path().display())).unwrap();
    let output = CropOutput::from_url(&url).unwrap();

    let frame = Frame::new(RgbImage::new(10, 10), 12, Duration::ZERO);
    output
      .render_result(
        &frame,
        &result(vec![
          detection([0.0, 0.0, 5.0, 5.0], "black"),
          detection([5.0, 5.0, 10.0, 10.0], "dark/navy"),
        ]),
      )
      .unwrap();
    let empty = Frame::new(RgbImage::new(10, 10), 13, Duration::ZERO);
    output.render_result(&empty, &result(vec![])).unwrap();

    let mut names: Vec<String> = std::fs::read_dir(dir.path().join("crops"))
      .unwrap()
      .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
      .collect();
    names.sort();
    assert_eq!(
      names,
      vec!["000012-0-black.png", "000012-1-dark_navy.png", "000013-0.png"]
    );
    let crop = image::open(dir.path().join("crops/000012-0-black.png")).unwrap();
    assert_eq!((crop.width(), crop.height()), (5, 5));
  }
}
