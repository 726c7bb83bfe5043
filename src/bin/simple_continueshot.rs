// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/bin/simple_continueshot.rs - 逐帧顺序检测
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

use anyhow::Result;
use clap::Parser;
use url::Url;

use tracing::info;
use xiyi::{
  FromUrl,
  engine::EngineLoaderWrapper,
  input::InputWrapper,
  model::YoloDetectorBuilder,
  output::OutputWrapper,
  task::{ContinuousTask, Task, interrupt_channel},
};

/// 洗衣计数：逐帧顺序检测
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 模型地址
  #[arg(long, value_name = "MODEL")]
  pub model: Url,
  /// 输入来源
  #[arg(long, value_name = "SOURCE")]
  pub input: Url,
  /// 输出路径
  #[arg(long, value_name = "OUTPUT")]
  pub output: Url,

  #[arg(long, value_name = "FRAME_NUMBER")]
  pub frame_number: Option<usize>,
  /// 覆盖置信度阈值
  #[arg(long, value_name = "CONFIDENCE")]
  pub confidence: Option<f32>,
  /// 覆盖 NMS 的 IoU 阈值
  #[arg(long, value_name = "IOU")]
  pub nms_threshold: Option<f32>,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  info!("模型文件路径: {}", args.model);
  info!("输入来源: {}", args.input);
  info!("输出路径: {}", args.output);

  let mut builder = YoloDetectorBuilder::<EngineLoaderWrapper>::from_url(&args.model)?;
  if let Some(confidence) = args.confidence {
    builder = builder.confidence_threshold(confidence);
  }
  if let Some(iou) = args.nms_threshold {
    builder = builder.iou_threshold(iou);
  }

  let input = InputWrapper::from_url(&args.input)?;
  let model = builder.setup()?;
  let output = OutputWrapper::from_url(&args.output)?;

  ContinuousTask::default()
    .with_frame_number(args.frame_number)
    .with_stop_signal(interrupt_channel()?)
    .run_task(input, model, output)?;

  Ok(())
}
