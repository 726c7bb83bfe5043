// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/model/yolo.rs - YOLO 检测器
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
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
  FromUrl,
  engine::{EngineError, EngineLoader, EngineLoaderWrapper, InferenceEngine},
  frame::{Frame, InputTensor},
  model::{
    DetectOutcome, DetectResult, Model,
    config::{ConfigError, DetectorConfig},
    label::{LabelError, LabelTable},
    postprocess::{PostProcessor, PostprocessError},
  },
};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("配置错误: {0}")]
  ConfigError(#[from] ConfigError),
  #[error("标签错误: {0}")]
  LabelError(#[from] LabelError),
  #[error("模型加载错误: {0}")]
  LoadError(BoxError),
  #[error("推理错误: {0}")]
  InferenceError(BoxError),
  #[error("后处理错误: {0}")]
  PostprocessError(#[from] PostprocessError),
}

impl From<EngineError> for DetectorError {
  fn from(err: EngineError) -> Self {
    DetectorError::LoadError(Box::new(err))
  }
}

/// 尚未加载模型的检测器，`setup` 之后才能检测
pub struct YoloDetectorBuilder<L> {
  loader: L,
  config: DetectorConfig,
  labels: LabelTable,
}

impl FromUrl for YoloDetectorBuilder<EngineLoaderWrapper> {
  type Error = DetectorError;

  /// 方案决定引擎，查询参数决定阈值与标签，例如
  /// `replay:///data/tensor.json?conf=0.3&labels=/data/labels.txt`
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    let loader = EngineLoaderWrapper::from_url(url)?;
    let config = DetectorConfig::from_url(url)?;
    let labels = LabelTable::from_url(url)?;
    Ok(Self {
      loader,
      config,
      labels,
    })
  }
}

impl<L: EngineLoader> YoloDetectorBuilder<L> {
  pub fn new(loader: L) -> Self {
    Self {
      loader,
      config: DetectorConfig::default(),
      labels: LabelTable::default(),
    }
  }

  pub fn config(mut self, config: DetectorConfig) -> Self {
    self.config = config;
    self
  }

  pub fn labels(mut self, labels: LabelTable) -> Self {
    self.labels = labels;
    self
  }

  pub fn confidence_threshold(mut self, threshold: f32) -> Self {
    self.config.confidence_threshold = threshold;
    self
  }

  pub fn iou_threshold(mut self, threshold: f32) -> Self {
    self.config.iou_threshold = threshold;
    self
  }

  /// 加载模型并检查输出形状与标签表是否匹配，任何不匹配都会中止构造
  pub fn setup(self) -> Result<YoloDetector<L::Engine>, DetectorError> {
    let Self {
      loader,
      mut config,
      labels,
    } = self;
    config.validate()?;

    info!("加载推理引擎");
    let engine = loader
      .load()
      .map_err(|e| DetectorError::LoadError(Box::new(e)))?;

    let engine_size = engine.input_size();
    if engine_size != config.input_size {
      warn!(
        "配置的输入尺寸 {} 与引擎输入尺寸 {} 不一致, 以引擎为准",
        config.input_size, engine_size
      );
      config.input_size = engine_size;
    }

    let postprocessor = PostProcessor::new(config, labels)?;
    let geometry = postprocessor.geometry(engine.output_shape()).map_err(|e| {
      error!("模型输出与配置不匹配: {}", e);
      e
    })?;
    debug!(
      "输出形状 {:?}: {} 个候选框, {} 个类别",
      engine.output_shape(),
      geometry.candidates,
      geometry.classes
    );
    info!("检测器就绪");

    Ok(YoloDetector {
      engine,
      postprocessor,
    })
  }
}

/// 已加载模型的检测器，丢弃时释放引擎
pub struct YoloDetector<E: InferenceEngine> {
  engine: E,
  postprocessor: PostProcessor,
}

impl<E: InferenceEngine> YoloDetector<E> {
  pub fn input_size(&self) -> u32 {
    self.postprocessor.config().input_size
  }

  pub fn postprocessor(&self) -> &PostProcessor {
    &self.postprocessor
  }

  /// 预处理、推理一次、后处理；框坐标位于模型输入空间
  pub fn detect(&mut self, image: &RgbImage) -> Result<DetectOutcome, DetectorError> {
    let input = InputTensor::from_image(image, self.input_size());
    self.detect_tensor(&input)
  }

  pub fn detect_tensor(&mut self, input: &InputTensor) -> Result<DetectOutcome, DetectorError> {
    let now = Instant::now();
    let output = self
      .engine
      .infer(input)
      .map_err(|e| DetectorError::InferenceError(Box::new(e)))?;
    let detections = self.postprocessor.process(&output)?;
    let elapsed = now.elapsed();
    debug!("检测到 {} 个物体, 耗时 {:.2?}", detections.len(), elapsed);
    Ok(DetectOutcome::from_detections(detections, elapsed))
  }
}

impl<E: InferenceEngine> Model for YoloDetector<E> {
  type Input = Frame;
  type Output = DetectResult;
  type Error = DetectorError;

  fn infer(&mut self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let outcome = self.detect(&input.image)?;
    Ok(DetectResult {
      outcome,
      input_size: self.input_size(),
    })
  }
}

impl<E: InferenceEngine> Drop for YoloDetector<E> {
  fn drop(&mut self) {
    info!("释放推理引擎");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::engine::{OutputTensor, ReplayEngine, ReplayEngineError};
  use crate::model::TensorLayout;

  struct Preloaded(ReplayEngine);

  impl EngineLoader for Preloaded {
    type Engine = ReplayEngine;
    type Error = ReplayEngineError;

    fn load(self) -> Result<Self::Engine, Self::Error> {
      Ok(self.0)
    }
  }

  fn engine(size: u32, shape: Vec<usize>, data: Vec<f32>) -> Preloaded {
    Preloaded(ReplayEngine::new(size, OutputTensor::new(shape, data).unwrap()))
  }

  #[test]
  fn detects_single_object() {
    // [cx, cy, w, h, 5 scores] 按通道排布，K = 1
    let loader = engine(800, vec![1, 9, 1], vec![0.5, 0.5, 0.2, 0.2, 0.0, 0.0, 0.0, 0.0, 0.95]);
    let mut detector = YoloDetectorBuilder::new(loader).setup().unwrap();
    let outcome = detector.detect(&RgbImage::new(1024, 768)).unwrap();
    let detections = outcome.detections();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].label, "white");
    assert!((detections[0].bbox.left - 320.0).abs() < 1e-3);
    assert!(outcome.elapsed().is_some());
  }

  #[test]
  fn empty_detection_is_not_an_error() {
    let loader = engine(800, vec![1, 9, 1], vec![0.5, 0.5, 0.2, 0.2, 0.0, 0.1, 0.0, 0.0, 0.0]);
    let mut detector = YoloDetectorBuilder::new(loader).setup().unwrap();
    let outcome = detector.detect(&RgbImage::new(64, 64)).unwrap();
    assert_eq!(outcome, DetectOutcome::Empty);
  }

  #[test]
  fn label_mismatch_aborts_setup() {
    let loader = engine(800, vec![1, 9, 1], vec![0.0; 9]);
    let labels = LabelTable::new(["shirt", "sock"]).unwrap();
    let result = YoloDetectorBuilder::new(loader).labels(labels).setup();
    assert!(matches!(
      result,
      Err(DetectorError::PostprocessError(PostprocessError::ClassCountMismatch {
        classes: 5,
        labels: 2
      }))
    ));
  }

  #[test]
  fn layout_mismatch_aborts_setup() {
    let loader = engine(800, vec![1, 9, 2], vec![0.0; 18]);
    let config = DetectorConfig::default().with_layout(TensorLayout::RowsWithObjectness);
    assert!(YoloDetectorBuilder::new(loader).config(config).setup().is_err());
  }

  #[test]
  fn invalid_threshold_aborts_setup() {
    let loader = engine(800, vec![1, 9, 1], vec![0.0; 9]);
    let result = YoloDetectorBuilder::new(loader).confidence_threshold(2.0).setup();
    assert!(matches!(result, Err(DetectorError::ConfigError(_))));
  }

  #[test]
  fn engine_input_size_wins() {
    let loader = engine(640, vec![1, 9, 1], vec![0.5, 0.5, 0.2, 0.2, 0.9, 0.0, 0.0, 0.0, 0.0]);
    let mut detector = YoloDetectorBuilder::new(loader).setup().unwrap();
    assert_eq!(detector.input_size(), 640);
    let frame = Frame::new(RgbImage::new(1280, 640), 0, Default::default());
    let result = detector.infer(&frame).unwrap();
    assert_eq!(result.input_size, 640);
    let rescaled = result.rescaled(1280, 640);
    assert!((rescaled[0].bbox.left - 512.0).abs() < 1e-2);
    assert!((rescaled[0].bbox.top - 256.0).abs() < 1e-2);
  }

  #[test]
  fn builder_reads_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tensor.json");
    crate::engine::RecordedTensor {
      input_size: 800,
      shape: vec![1, 9, 1],
      data: vec![0.5, 0.5, 0.2, 0.2, 0.0, 0.0, 0.6, 0.0, 0.0],
    }
    .save(&path)
    .unwrap();
    let url = Url::parse(&format!("replay://{}?conf=0.7", path.display())).unwrap();
    let mut detector = YoloDetectorBuilder::from_url(&url).unwrap().setup().unwrap();
    assert!(detector.detect(&RgbImage::new(8, 8)).unwrap().is_empty());
  }
}
