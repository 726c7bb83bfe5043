// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/output/draw.rs - 检测结果可视化与文本记录
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut},
  rect::Rect,
};
use thiserror::Error;
use tracing::info;

use crate::model::{DetectResult, Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const BOX_THICKNESS: i32 = 2;

/// 按类别循环使用的边框颜色
const PALETTE: [[u8; 3]; 6] = [
  [0, 0, 255],
  [255, 64, 64],
  [0, 200, 0],
  [255, 160, 0],
  [160, 0, 200],
  [0, 180, 180],
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("读取字体文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

pub fn class_color(class_id: usize) -> [u8; 3] {
  PALETTE[class_id % PALETTE.len()]
}

/// 没有字体时只画边框
#[derive(Default)]
pub struct Draw {
  font: Option<FontVec>,
}

impl Draw {
  pub fn with_font_file<P: AsRef<Path>>(path: P) -> Result<Self, DrawError> {
    let path = path.as_ref();
    info!("加载字体文件: {}", path.display());
    let data = std::fs::read(path)?;
    let font = FontVec::try_from_vec(data).map_err(|e| DrawError::InvalidFont(e.to_string()))?;
    Ok(Self { font: Some(font) })
  }

  /// 检测框会先从模型输入空间映射到图像尺寸
  pub fn draw_detections(&self, image: &mut RgbImage, result: &DetectResult) {
    for det in result.rescaled(image.width(), image.height()) {
      self.draw_bbox_with_label(image, &det, class_color(det.class_id));
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, det: &Detection, color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (det.bbox.left.floor() as i32).clamp(0, w - 1);
    let y_min = (det.bbox.top.floor() as i32).clamp(0, h - 1);
    let x_max = (det.bbox.right.ceil() as i32).clamp(0, w - 1);
    let y_max = (det.bbox.bottom.ceil() as i32).clamp(0, h - 1);

    if x_min >= x_max || y_min >= y_max {
      return;
    }

    // 边框加粗
    for t in 0..BOX_THICKNESS {
      let width = x_max - x_min - 2 * t;
      let height = y_max - y_min - 2 * t;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32 + 1, height as u32 + 1);
      draw_hollow_rect_mut(image, rect, Rgb(color));
    }

    let Some(font) = &self.font else {
      return;
    };

    let label = format!("{} {:.2}", det.label, det.confidence);
    let text_width = (label.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32;
    let label_x = x_min;
    let label_y = (y_min - LABEL_TEXT_HEIGHT).max(0);
    let label_width = text_width.min(w - label_x);
    if label_width <= 0 {
      return;
    }

    let rect = Rect::at(label_x, label_y).of_size(label_width as u32, LABEL_TEXT_HEIGHT as u32);
    draw_filled_rect_mut(image, rect, Rgb(color));
    draw_text_mut(
      image,
      Rgb([255u8, 255u8, 255u8]),
      label_x,
      label_y + LABEL_TEXT_VERTICAL_PADDING,
      PxScale::from(LABEL_FONT_SIZE),
      font,
      &label,
    );
  }
}

/// 以文本形式记录检测结果，每行 `类别, 置信度, left, top, right, bottom`
pub struct Record {
  pub label_with_name: bool,
}

impl Record {
  pub fn lines(&self, result: &DetectResult, width: u32, height: u32) -> Vec<String> {
    result
      .rescaled(width, height)
      .iter()
      .map(|det| {
        let name = if self.label_with_name {
          det.label.clone()
        } else {
          det.class_id.to_string()
        };
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          name, det.confidence, det.bbox.left, det.bbox.top, det.bbox.right, det.bbox.bottom
        )
      })
      .collect()
  }

  pub fn record(
    &self,
    result: &DetectResult,
    width: u32,
    height: u32,
    path: &Path,
  ) -> Result<(), std::io::Error> {
    let lines = self.lines(result, width, height);
    std::fs::write(path.with_extension("txt"), lines.join("\n"))
  }
}
