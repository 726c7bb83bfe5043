// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/engine/replay.rs - 回放录制好的输出张量
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

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{EngineLoader, InferenceEngine, OutputTensor, TensorError},
  frame::InputTensor,
};

#[derive(Error, Debug)]
pub enum ReplayEngineError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("JSON 解析错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("输入尺寸 {actual} 与录制时的尺寸 {expected} 不一致")]
  InputSizeMismatch { expected: u32, actual: u32 },
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 录制文件的格式：`{"input_size": 800, "shape": [1, 9, 13125], "data": [...]}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedTensor {
  pub input_size: u32,
  pub shape: Vec<usize>,
  pub data: Vec<f32>,
}

impl RecordedTensor {
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ReplayEngineError> {
    let bytes = std::fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
  }

  pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ReplayEngineError> {
    let bytes = serde_json::to_vec(self)?;
    std::fs::write(path, bytes)?;
    Ok(())
  }
}

pub struct ReplayEngineBuilder {
  path: PathBuf,
}

impl FromUrlWithScheme for ReplayEngineBuilder {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayEngineBuilder {
  type Error = ReplayEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplayEngineError::SchemeMismatch(format!(
        "期望方案 '{}', 实际方案 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    Ok(ReplayEngineBuilder {
      path: PathBuf::from(url.path()),
    })
  }
}

impl ReplayEngineBuilder {
  pub fn new<P: Into<PathBuf>>(path: P) -> Self {
    Self { path: path.into() }
  }
}

impl EngineLoader for ReplayEngineBuilder {
  type Engine = ReplayEngine;
  type Error = ReplayEngineError;

  fn load(self) -> Result<Self::Engine, Self::Error> {
    info!("加载录制的输出张量: {}", self.path.display());
    let recorded = RecordedTensor::load(&self.path)?;
    let tensor = OutputTensor::new(recorded.shape, recorded.data)?;
    debug!("张量形状: {:?}", tensor.shape());
    Ok(ReplayEngine::new(recorded.input_size, tensor))
  }
}

/// 对任何输入都返回同一个输出张量，用于离线调试后处理
pub struct ReplayEngine {
  input_size: u32,
  tensor: OutputTensor,
}

impl ReplayEngine {
  pub fn new(input_size: u32, tensor: OutputTensor) -> Self {
    Self { input_size, tensor }
  }
}

impl InferenceEngine for ReplayEngine {
  type Error = ReplayEngineError;

  fn input_size(&self) -> u32 {
    self.input_size
  }

  fn output_shape(&self) -> &[usize] {
    self.tensor.shape()
  }

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, Self::Error> {
    if input.size() != self.input_size {
      error!(
        "输入尺寸 {} 与录制尺寸 {} 不一致",
        input.size(),
        self.input_size
      );
      return Err(ReplayEngineError::InputSizeMismatch {
        expected: self.input_size,
        actual: input.size(),
      });
    }
    Ok(self.tensor.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::RgbImage;

  #[test]
  fn loads_recorded_tensor_from_url() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tensor.json");
    RecordedTensor {
      input_size: 32,
      shape: vec![1, 6, 2],
      data: vec![0.5; 12],
    }
    .save(&path)
    .unwrap();

    let url = Url::from_file_path(&path).unwrap();
    let url = Url::parse(&url.as_str().replacen("file", "replay", 1)).unwrap();
    let mut engine = ReplayEngineBuilder::from_url(&url).unwrap().load().unwrap();
    assert_eq!(engine.input_size(), 32);
    assert_eq!(engine.output_shape(), &[1, 6, 2]);

    let input = InputTensor::from_image(&RgbImage::new(64, 48), 32);
    let output = engine.infer(&input).unwrap();
    assert_eq!(output.data().len(), 12);
  }

  #[test]
  fn rejects_wrong_input_size() {
    let tensor = OutputTensor::new(vec![1, 6, 1], vec![0.0; 6]).unwrap();
    let mut engine = ReplayEngine::new(32, tensor);
    let input = InputTensor::from_image(&RgbImage::new(16, 16), 16);
    assert!(matches!(
      engine.infer(&input),
      Err(ReplayEngineError::InputSizeMismatch {
        expected: 32,
        actual: 16
      })
    ));
  }

  #[test]
  fn rejects_inconsistent_recording() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.json");
    std::fs::write(&path, r#"{"input_size": 8, "shape": [2, 3], "data": [1.0]}"#).unwrap();
    assert!(matches!(
      ReplayEngineBuilder::new(&path).load(),
      Err(ReplayEngineError::TensorError(_))
    ));
  }
}
