// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/engine/rknn.rs - RKNN NPU 推理引擎
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

use rknpu::{Context, InitFlags, TensorFormat, TensorType};
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  engine::{EngineLoader, InferenceEngine, OutputTensor, TensorError},
  frame::InputTensor,
};

const RKNN_NUM_INPUTS: u32 = 1;
const RKNN_NUM_OUTPUTS: u32 = 1;
const DEFAULT_INPUT_SIZE: u32 = 800;

#[derive(Error, Debug)]
pub enum RknnEngineError {
  #[error("模型加载错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("RKNN 错误: {0}")]
  RknnError(#[from] rknpu::Error),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("输出形状参数无效: {0}")]
  ShapeError(String),
  #[error("张量错误: {0}")]
  TensorError(#[from] TensorError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

fn parse_shape(value: &str) -> Result<Vec<usize>, RknnEngineError> {
  let shape = value
    .split('x')
    .map(|dim| dim.trim().parse::<usize>())
    .collect::<Result<Vec<_>, _>>()
    .map_err(|_| RknnEngineError::ShapeError(value.to_string()))?;
  if shape.is_empty() || shape.contains(&0) {
    return Err(RknnEngineError::ShapeError(value.to_string()));
  }
  Ok(shape)
}

/// `rknn:///model.rknn?shape=1x9x13125&size=800`
pub struct RknnEngineBuilder {
  model_path: PathBuf,
  input_size: u32,
  output_shape: Vec<usize>,
  flags: InitFlags,
}

impl FromUrlWithScheme for RknnEngineBuilder {
  const SCHEME: &'static str = "rknn";
}

impl FromUrl for RknnEngineBuilder {
  type Error = RknnEngineError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(RknnEngineError::SchemeMismatch(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let mut input_size = DEFAULT_INPUT_SIZE;
    let mut output_shape = None;
    for (k, v) in url.query_pairs() {
      match &*k {
        "size" => {
          input_size = v
            .parse()
            .map_err(|_| RknnEngineError::ShapeError(format!("size={v}")))?;
        }
        "shape" => output_shape = Some(parse_shape(&v)?),
        _ => {}
      }
    }

    let output_shape = output_shape
      .ok_or_else(|| RknnEngineError::ShapeError("缺少 shape 参数".to_string()))?;

    Ok(RknnEngineBuilder {
      model_path: PathBuf::from(url.path()),
      input_size,
      output_shape,
      flags: InitFlags::default(),
    })
  }
}

impl RknnEngineBuilder {
  pub fn flags(mut self, flags: InitFlags) -> Self {
    self.flags = flags;
    self
  }
}

impl EngineLoader for RknnEngineBuilder {
  type Engine = RknnEngine;
  type Error = RknnEngineError;

  fn load(self) -> Result<Self::Engine, Self::Error> {
    info!("加载模型文件: {}", self.model_path.display());
    let model_data = std::fs::read(&self.model_path)?;
    debug!(
      "模型文件大小: {:.2} MB",
      model_data.len() as f64 / (1024.0 * 1024.0)
    );

    info!("创建 RKNN 推理上下文");
    let context = Context::new(&model_data, self.flags)?;

    if let Ok(version) = context.sdk_version() {
      if let Ok(api_ver) = version.api_version() {
        debug!("模型 API 版本: {}", api_ver);
      }
      if let Ok(drv_ver) = version.driver_version() {
        debug!("模型驱动版本: {}", drv_ver);
      }
    }

    let num_inputs = context.num_inputs()?;
    let num_outputs = context.num_outputs()?;
    if num_inputs != RKNN_NUM_INPUTS || num_outputs != RKNN_NUM_OUTPUTS {
      error!(
        "预期模型输入/输出数量为 {}/{}, 实际为 {}/{}",
        RKNN_NUM_INPUTS, RKNN_NUM_OUTPUTS, num_inputs, num_outputs
      );
      return Err(RknnEngineError::ModelInvalid(format!(
        "输入数量 {num_inputs}, 输出数量 {num_outputs}"
      )));
    }
    info!("模型加载完成");

    Ok(RknnEngine {
      context,
      input_size: self.input_size,
      output_shape: self.output_shape,
    })
  }
}

/// 单输入单输出的 RKNN 模型，输入为 NHWC 排列的 `u8` 像素
pub struct RknnEngine {
  context: Context,
  input_size: u32,
  output_shape: Vec<usize>,
}

impl InferenceEngine for RknnEngine {
  type Error = RknnEngineError;

  fn input_size(&self) -> u32 {
    self.input_size
  }

  fn output_shape(&self) -> &[usize] {
    &self.output_shape
  }

  fn infer(&mut self, input: &InputTensor) -> Result<OutputTensor, Self::Error> {
    debug!("设置模型输入");
    self
      .context
      .set_input(0, input.as_nhwc(), TensorFormat::NHWC, TensorType::UInt8)?;

    debug!("执行模型推理");
    self.context.run()?;

    let output = self.context.get_outputs()?;
    let data = output.get_f32(0)?.to_vec();
    Ok(OutputTensor::new(self.output_shape.clone(), data)?)
  }
}
