// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/model/config.rs - 检测器配置
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

use std::{fmt, str::FromStr};

use thiserror::Error;
use tracing::error;
use url::Url;

const DEFAULT_INPUT_SIZE: u32 = 800;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.5;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
  #[error("阈值 {name} 必须位于 [0, 1] 区间内, 实际为 {value}")]
  InvalidThreshold { name: &'static str, value: f32 },
  #[error("模型输入尺寸必须大于 0")]
  InvalidInputSize,
  #[error("无法解析参数 {key}={value}")]
  InvalidParameter { key: String, value: String },
}

/// 输出张量的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TensorLayout {
  /// `[1, 4 + N, K]`，按通道排布，没有 objectness
  #[default]
  ChannelsFirst,
  /// `[1, K, 5 + N]`，按候选框排布，框之后跟随 objectness
  RowsWithObjectness,
}

impl TensorLayout {
  /// 每个候选框在类别分数之前的数值个数
  pub fn box_channels(&self) -> usize {
    match self {
      TensorLayout::ChannelsFirst => 4,
      TensorLayout::RowsWithObjectness => 5,
    }
  }
}

impl FromStr for TensorLayout {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "channels-first" | "channels" => Ok(TensorLayout::ChannelsFirst),
      "rows" | "rows-with-objectness" => Ok(TensorLayout::RowsWithObjectness),
      _ => Err(ConfigError::InvalidParameter {
        key: "layout".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

impl fmt::Display for TensorLayout {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TensorLayout::ChannelsFirst => write!(f, "channels-first"),
      TensorLayout::RowsWithObjectness => write!(f, "rows"),
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsMode {
  /// 不区分类别，所有框互相抑制
  #[default]
  Global,
  /// 只有同类别的框互相抑制
  PerClass,
}

impl FromStr for NmsMode {
  type Err = ConfigError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "global" => Ok(NmsMode::Global),
      "class" | "per-class" => Ok(NmsMode::PerClass),
      _ => Err(ConfigError::InvalidParameter {
        key: "nms".to_string(),
        value: s.to_string(),
      }),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 模型输入边长（正方形）
  pub input_size: u32,
  /// 置信度阈值，严格大于该值的检测才会保留
  pub confidence_threshold: f32,
  /// NMS IoU 阈值
  pub iou_threshold: f32,
  pub layout: TensorLayout,
  pub nms: NmsMode,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      input_size: DEFAULT_INPUT_SIZE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      iou_threshold: DEFAULT_IOU_THRESHOLD,
      layout: TensorLayout::default(),
      nms: NmsMode::default(),
    }
  }
}

impl DetectorConfig {
  pub fn with_confidence_threshold(mut self, threshold: f32) -> Self {
    self.confidence_threshold = threshold;
    self
  }

  pub fn with_iou_threshold(mut self, threshold: f32) -> Self {
    self.iou_threshold = threshold;
    self
  }

  pub fn with_input_size(mut self, size: u32) -> Self {
    self.input_size = size;
    self
  }

  pub fn with_layout(mut self, layout: TensorLayout) -> Self {
    self.layout = layout;
    self
  }

  pub fn with_nms(mut self, nms: NmsMode) -> Self {
    self.nms = nms;
    self
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.input_size == 0 {
      error!("模型输入尺寸为 0");
      return Err(ConfigError::InvalidInputSize);
    }
    check_threshold("conf", self.confidence_threshold)?;
    check_threshold("iou", self.iou_threshold)?;
    Ok(())
  }

  /// 从模型 URL 的查询参数中读取 `size`、`conf`、`iou`、`layout`、`nms`，
  /// 其他参数留给引擎自行解析
  pub fn from_url(url: &Url) -> Result<Self, ConfigError> {
    let mut config = DetectorConfig::default();
    for (key, value) in url.query_pairs() {
      match &*key {
        "size" => config = config.with_input_size(parse_value(&key, &value)?),
        "conf" => config = config.with_confidence_threshold(parse_value(&key, &value)?),
        "iou" => config = config.with_iou_threshold(parse_value(&key, &value)?),
        "layout" => config = config.with_layout(value.parse()?),
        "nms" => config = config.with_nms(value.parse()?),
        _ => {}
      }
    }
    config.validate()?;
    Ok(config)
  }
}

fn check_threshold(name: &'static str, value: f32) -> Result<(), ConfigError> {
  if (0.0..=1.0).contains(&value) {
    Ok(())
  } else {
    error!("阈值 {} 超出范围: {}", name, value);
    Err(ConfigError::InvalidThreshold { name, value })
  }
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
  value.parse().map_err(|_| ConfigError::InvalidParameter {
    key: key.to_string(),
    value: value.to_string(),
  })
}
