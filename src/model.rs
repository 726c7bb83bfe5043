// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/model.rs - 模型与检测结果
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

use serde::Serialize;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 像素坐标系下的矩形框
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BoundingBox {
  pub left: f32,
  pub top: f32,
  pub right: f32,
  pub bottom: f32,
}

impl BoundingBox {
  pub fn new(left: f32, top: f32, right: f32, bottom: f32) -> Self {
    Self {
      left,
      top,
      right,
      bottom,
    }
  }

  /// 由归一化的中心点与宽高编码得到角点编码，`size` 为正方形输入的边长
  pub fn from_center(cx: f32, cy: f32, w: f32, h: f32, size: f32) -> Self {
    Self {
      left: (cx - w / 2.0) * size,
      top: (cy - h / 2.0) * size,
      right: (cx + w / 2.0) * size,
      bottom: (cy + h / 2.0) * size,
    }
  }

  pub fn width(&self) -> f32 {
    (self.right - self.left).max(0.0)
  }

  pub fn height(&self) -> f32 {
    (self.bottom - self.top).max(0.0)
  }

  pub fn area(&self) -> f32 {
    self.width() * self.height()
  }

  pub fn intersection_area(&self, other: &BoundingBox) -> f32 {
    let left = self.left.max(other.left);
    let top = self.top.max(other.top);
    let right = self.right.min(other.right);
    let bottom = self.bottom.min(other.bottom);
    (right - left).max(0.0) * (bottom - top).max(0.0)
  }

  /// 交并比；面积为零或数值异常的框对返回 0
  pub fn iou(&self, other: &BoundingBox) -> f32 {
    let intersection = self.intersection_area(other);
    let union = self.area() + other.area() - intersection;
    if !union.is_finite() || union <= 0.0 {
      return 0.0;
    }
    let iou = intersection / union;
    if iou.is_nan() { 0.0 } else { iou }
  }

  pub fn scaled(&self, scale_x: f32, scale_y: f32) -> Self {
    Self {
      left: self.left * scale_x,
      top: self.top * scale_y,
      right: self.right * scale_x,
      bottom: self.bottom * scale_y,
    }
  }
}

/// 单个检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  /// 边界框
  pub bbox: BoundingBox,
  /// 类别索引
  pub class_id: usize,
  /// 类别名称
  pub label: String,
  /// 置信度
  pub confidence: f32,
}

impl Detection {
  pub fn rescaled(&self, scale_x: f32, scale_y: f32) -> Self {
    Self {
      bbox: self.bbox.scaled(scale_x, scale_y),
      ..self.clone()
    }
  }
}

/// 一次检测的结果，空结果与失败区分开
#[derive(Debug, Clone, PartialEq)]
pub enum DetectOutcome {
  Empty,
  Found {
    detections: Vec<Detection>,
    elapsed: Duration,
  },
}

impl DetectOutcome {
  pub fn from_detections(detections: Vec<Detection>, elapsed: Duration) -> Self {
    if detections.is_empty() {
      DetectOutcome::Empty
    } else {
      DetectOutcome::Found {
        detections,
        elapsed,
      }
    }
  }

  pub fn detections(&self) -> &[Detection] {
    match self {
      DetectOutcome::Empty => &[],
      DetectOutcome::Found { detections, .. } => detections,
    }
  }

  pub fn is_empty(&self) -> bool {
    matches!(self, DetectOutcome::Empty)
  }

  pub fn elapsed(&self) -> Option<Duration> {
    match self {
      DetectOutcome::Empty => None,
      DetectOutcome::Found { elapsed, .. } => Some(*elapsed),
    }
  }
}

/// 带有模型输入尺寸的检测结果，框坐标位于 `input_size × input_size` 空间
#[derive(Debug, Clone, PartialEq)]
pub struct DetectResult {
  pub outcome: DetectOutcome,
  pub input_size: u32,
}

impl DetectResult {
  pub fn is_empty(&self) -> bool {
    self.outcome.is_empty()
  }

  pub fn detections(&self) -> &[Detection] {
    self.outcome.detections()
  }

  /// 将检测框映射到 `width × height` 的图像上
  pub fn rescaled(&self, width: u32, height: u32) -> Vec<Detection> {
    let size = self.input_size.max(1) as f32;
    let scale_x = width as f32 / size;
    let scale_y = height as f32 / size;
    self
      .detections()
      .iter()
      .map(|det| det.rescaled(scale_x, scale_y))
      .collect()
  }
}

mod config;
mod label;
mod postprocess;
mod yolo;

pub use self::config::{ConfigError, DetectorConfig, NmsMode, TensorLayout};
pub use self::label::{LabelError, LabelTable};
pub use self::postprocess::{PostProcessor, PostprocessError, TensorGeometry, non_max_suppression};
pub use self::yolo::{DetectorError, YoloDetector, YoloDetectorBuilder};
