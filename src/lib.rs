// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/lib.rs - 库主文件
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

//! 衣物检测的后处理与推理循环。
//!
//! 推理引擎输出的原始张量经过 [`model::PostProcessor`] 解码、置信度过滤与
//! 非极大值抑制后得到带标签的检测结果；[`worker::DetectionWorker`] 则在单独的
//! 线程上以“只保留最新帧”的方式驱动检测器。

pub mod engine;
pub mod frame;
pub mod input;
pub mod model;
pub mod output;
pub mod task;
pub mod worker;

pub trait FromUrl {
  type Error;
  fn from_url(url: &url::Url) -> Result<Self, Self::Error>
  where
    Self: Sized;
}

pub trait FromUrlWithScheme: FromUrl {
  const SCHEME: &'static str;
}
