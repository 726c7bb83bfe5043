// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/model/postprocess.rs - 检测后处理：解码、置信度过滤与 NMS
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

use thiserror::Error;
use tracing::{debug, error};

use crate::{
  engine::OutputTensor,
  model::{
    BoundingBox, Detection,
    config::{ConfigError, DetectorConfig, NmsMode, TensorLayout},
    label::LabelTable,
  },
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PostprocessError {
  #[error("输出张量形状 {shape:?} 不符合 {layout} 排布")]
  InvalidShape { shape: Vec<usize>, layout: String },
  #[error("模型输出 {classes} 个类别, 标签表有 {labels} 个")]
  ClassCountMismatch { classes: usize, labels: usize },
}

/// 输出张量的几何信息
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TensorGeometry {
  /// 候选框数量 K
  pub candidates: usize,
  /// 每个候选框的数值个数（框 + objectness + 类别分数）
  pub channels: usize,
  /// 类别数量 N
  pub classes: usize,
}

/// 类别分数的跨步视图，按通道排布时步长为 K，按候选框排布时步长为 1
struct ScoreView<'a> {
  data: &'a [f32],
  start: usize,
  step: usize,
  len: usize,
}

impl ScoreView<'_> {
  /// 返回最大分数及其索引，并列时取第一个；NaN 不参与比较
  fn argmax(&self) -> Option<(usize, f32)> {
    let mut best: Option<(usize, f32)> = None;
    for i in 0..self.len {
      let score = self.data[self.start + i * self.step];
      if score.is_nan() {
        continue;
      }
      match best {
        Some((_, max)) if score <= max => {}
        _ => best = Some((i, score)),
      }
    }
    best
  }
}

/// 单个候选框的原始数值，只在一次后处理调用中存在
struct RawDetectionRow<'a> {
  cx: f32,
  cy: f32,
  w: f32,
  h: f32,
  objectness: f32,
  scores: ScoreView<'a>,
}

fn raw_rows<'a>(
  data: &'a [f32],
  layout: TensorLayout,
  geometry: TensorGeometry,
) -> impl Iterator<Item = RawDetectionRow<'a>> + 'a {
  let TensorGeometry {
    candidates,
    channels,
    classes,
  } = geometry;
  (0..candidates).map(move |k| match layout {
    TensorLayout::ChannelsFirst => {
      let at = |c: usize| data[c * candidates + k];
      RawDetectionRow {
        cx: at(0),
        cy: at(1),
        w: at(2),
        h: at(3),
        objectness: 1.0,
        scores: ScoreView {
          data,
          start: 4 * candidates + k,
          step: candidates,
          len: classes,
        },
      }
    }
    TensorLayout::RowsWithObjectness => {
      let row = &data[k * channels..(k + 1) * channels];
      RawDetectionRow {
        cx: row[0],
        cy: row[1],
        w: row[2],
        h: row[3],
        objectness: row[4],
        scores: ScoreView {
          data,
          start: k * channels + 5,
          step: 1,
          len: classes,
        },
      }
    }
  })
}

/// 贪心 NMS：按置信度降序（并列保持原顺序）逐个接受与已接受框 IoU 都不超过阈值的检测
pub fn non_max_suppression(
  mut candidates: Vec<Detection>,
  iou_threshold: f32,
  mode: NmsMode,
) -> Vec<Detection> {
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
  for candidate in candidates {
    let suppressed = kept.iter().any(|accepted| {
      let competes = match mode {
        NmsMode::Global => true,
        NmsMode::PerClass => accepted.class_id == candidate.class_id,
      };
      competes && accepted.bbox.iou(&candidate.bbox) > iou_threshold
    });
    if !suppressed {
      kept.push(candidate);
    }
  }
  kept
}

/// 无状态的后处理器：标签表与配置在构造时固定
#[derive(Debug, Clone)]
pub struct PostProcessor {
  config: DetectorConfig,
  labels: LabelTable,
}

impl PostProcessor {
  pub fn new(config: DetectorConfig, labels: LabelTable) -> Result<Self, ConfigError> {
    config.validate()?;
    Ok(Self { config, labels })
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  pub fn labels(&self) -> &LabelTable {
    &self.labels
  }

  /// 校验张量形状，允许省略前导的 batch 维
  pub fn geometry(&self, shape: &[usize]) -> Result<TensorGeometry, PostprocessError> {
    let layout = self.config.layout;
    let invalid = || PostprocessError::InvalidShape {
      shape: shape.to_vec(),
      layout: layout.to_string(),
    };

    let dims = match shape {
      [1, a, b] | [a, b] => (*a, *b),
      _ => return Err(invalid()),
    };
    let (channels, candidates) = match layout {
      TensorLayout::ChannelsFirst => dims,
      TensorLayout::RowsWithObjectness => (dims.1, dims.0),
    };
    if channels <= layout.box_channels() {
      return Err(invalid());
    }

    let classes = channels - layout.box_channels();
    if classes != self.labels.len() {
      error!(
        "模型输出类别数 {} 与标签数 {} 不一致",
        classes,
        self.labels.len()
      );
      return Err(PostprocessError::ClassCountMismatch {
        classes,
        labels: self.labels.len(),
      });
    }

    Ok(TensorGeometry {
      candidates,
      channels,
      classes,
    })
  }

  /// 解码并按置信度过滤，结果无序；没有通过阈值的候选框时返回空向量
  pub fn decode(&self, tensor: &OutputTensor) -> Result<Vec<Detection>, PostprocessError> {
    let geometry = self.geometry(tensor.shape())?;
    let threshold = self.config.confidence_threshold;
    let size = self.config.input_size as f32;

    let gate_objectness = self.config.layout == TensorLayout::RowsWithObjectness;

    let mut detections = Vec::new();
    for row in raw_rows(tensor.data(), self.config.layout, geometry) {
      // objectness 本身也须超过阈值，负值与 NaN 一并排除
      if gate_objectness && (row.objectness.is_nan() || row.objectness <= threshold) {
        continue;
      }
      let Some((class_id, max_score)) = row.scores.argmax() else {
        continue;
      };
      let confidence = row.objectness * max_score;
      if confidence.is_nan() || confidence <= threshold {
        continue;
      }

      detections.push(Detection {
        bbox: BoundingBox::from_center(row.cx, row.cy, row.w, row.h, size),
        class_id,
        label: self.labels.name(class_id).to_string(),
        confidence,
      });
    }

    debug!(
      "{} 个候选框中有 {} 个超过阈值 {}",
      geometry.candidates,
      detections.len(),
      threshold
    );
    Ok(detections)
  }

  pub fn suppress(&self, candidates: Vec<Detection>) -> Vec<Detection> {
    non_max_suppression(candidates, self.config.iou_threshold, self.config.nms)
  }

  /// 解码 → 过滤 → NMS
  pub fn process(&self, tensor: &OutputTensor) -> Result<Vec<Detection>, PostprocessError> {
    let candidates = self.decode(tensor)?;
    let detections = self.suppress(candidates);
    debug!("NMS 后保留 {} 个检测", detections.len());
    Ok(detections)
  }
}
