// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/engine.rs - 推理引擎接口
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
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::InputTensor};

/// 同步、阻塞的推理引擎。`infer` 需要 `&mut self`，同一个引擎句柄不会被并发调用。
pub trait InferenceEngine {
  type Error: std::error::Error + Send + Sync + 'static;

  /// 正方形输入的边长
  fn input_size(&self) -> u32;
  fn output_shape(&self) -> &[usize];
  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, Self::Error>;
}

/// 负责加载模型权重并创建引擎
pub trait EngineLoader {
  type Engine: InferenceEngine;
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(self) -> Result<Self::Engine, Self::Error>;
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TensorError {
  #[error("张量数据长度 {actual} 与形状 {shape:?} 不匹配")]
  LengthMismatch { shape: Vec<usize>, actual: usize },
}

/// 推理输出，行主序的 `f32` 数据
#[derive(Debug, Clone, PartialEq)]
pub struct OutputTensor {
  shape: Box<[usize]>,
  data: Box<[f32]>,
}

impl OutputTensor {
  pub fn new(shape: impl Into<Box<[usize]>>, data: impl Into<Box<[f32]>>) -> Result<Self, TensorError> {
    let shape = shape.into();
    let data = data.into();
    let expected: usize = shape.iter().product();
    if expected != data.len() {
      return Err(TensorError::LengthMismatch {
        shape: shape.to_vec(),
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }
}

mod replay;
pub use self::replay::{RecordedTensor, ReplayEngine, ReplayEngineBuilder, ReplayEngineError};

#[cfg(feature = "rknpu")]
mod rknn;
#[cfg(feature = "rknpu")]
pub use self::rknn::{RknnEngine, RknnEngineBuilder, RknnEngineError};

#[derive(Error, Debug)]
pub enum EngineError {
  #[error("回放引擎错误: {0}")]
  ReplayEngineError(#[from] ReplayEngineError),
  #[cfg(feature = "rknpu")]
  #[error("RKNN 引擎错误: {0}")]
  RknnEngineError(#[from] RknnEngineError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

/// 按 URL 方案选择的引擎加载器
pub enum EngineLoaderWrapper {
  Replay(ReplayEngineBuilder),
  #[cfg(feature = "rknpu")]
  Rknn(RknnEngineBuilder),
}

impl FromUrl for EngineLoaderWrapper {
  type Error = EngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ReplayEngineBuilder::SCHEME => Ok(EngineLoaderWrapper::Replay(
        ReplayEngineBuilder::from_url(url)?,
      )),
      #[cfg(feature = "rknpu")]
      RknnEngineBuilder::SCHEME => Ok(EngineLoaderWrapper::Rknn(RknnEngineBuilder::from_url(
        url,
      )?)),
      other => Err(EngineError::SchemeMismatch(other.to_string())),
    }
  }
}

impl EngineLoader for EngineLoaderWrapper {
  type Engine = EngineWrapper;
  type Error = EngineError;

  fn load(self) -> Result<Self::Engine, Self::Error> {
    match self {
      EngineLoaderWrapper::Replay(builder) => Ok(EngineWrapper::Replay(builder.load()?)),
      #[cfg(feature = "rknpu")]
      EngineLoaderWrapper::Rknn(builder) => Ok(EngineWrapper::Rknn(builder.load()?)),
    }
  }
}

pub enum EngineWrapper {
  Replay(ReplayEngine),
  #[cfg(feature = "rknpu")]
  Rknn(RknnEngine),
}

impl InferenceEngine for EngineWrapper {
  type Error = EngineError;

  fn input_size(&self) -> u32 {
    match self {
      EngineWrapper::Replay(engine) => engine.input_size(),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknn(engine) => engine.input_size(),
    }
  }

  fn output_shape(&self) -> &[usize] {
    match self {
      EngineWrapper::Replay(engine) => engine.output_shape(),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknn(engine) => engine.output_shape(),
    }
  }

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, Self::Error> {
    match self {
      EngineWrapper::Replay(engine) => Ok(engine.infer(input)?),
      #[cfg(feature = "rknpu")]
      EngineWrapper::Rknn(engine) => Ok(engine.infer(input)?),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tensor_length_must_match_shape() {
    assert!(OutputTensor::new(vec![1, 9, 2], vec![0.0; 18]).is_ok());
    assert_eq!(
      OutputTensor::new(vec![1, 9, 2], vec![0.0; 17]),
      Err(TensorError::LengthMismatch {
        shape: vec![1, 9, 2],
        actual: 17
      })
    );
  }

  #[test]
  fn unknown_scheme_is_rejected() {
    let url = Url::parse("onnx:///tmp/model.onnx").unwrap();
    assert!(matches!(
      EngineLoaderWrapper::from_url(&url),
      Err(EngineError::SchemeMismatch(_))
    ));
  }
}
