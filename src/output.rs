// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/output.rs - 输出定义
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

use crate::{FromUrl, FromUrlWithScheme, frame::Frame, model::DetectResult};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};

#[cfg(feature = "directory_record")]
mod directory_record;
#[cfg(feature = "directory_record")]
pub use self::directory_record::{DirectoryRecordOutput, DirectoryRecordOutputError, RecordMode};

mod log_output;
pub use self::log_output::{LogFormat, LogOutput, LogOutputError};

mod crop_output;
pub use self::crop_output::{Crop, CropOutput, CropOutputError, crop_detections};

#[derive(Error, Debug)]
pub enum OutputError {
  #[cfg(feature = "save_image_file")]
  #[error("保存图像文件错误: {0}")]
  SaveImageFileError(#[from] SaveImageFileError),
  #[cfg(feature = "directory_record")]
  #[error("目录记录输出错误: {0}")]
  DirectoryRecordOutputError(#[from] DirectoryRecordOutputError),
  #[error("日志输出错误: {0}")]
  LogOutputError(#[from] LogOutputError),
  #[error("裁剪输出错误: {0}")]
  CropOutputError(#[from] CropOutputError),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
}

pub enum OutputWrapper {
  #[cfg(feature = "save_image_file")]
  SaveImageFileOutput(SaveImageFileOutput),
  #[cfg(feature = "directory_record")]
  DirectoryRecordOutput(DirectoryRecordOutput),
  LogOutput(LogOutput),
  CropOutput(CropOutput),
}

impl FromUrl for OutputWrapper {
  type Error = OutputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      #[cfg(feature = "save_image_file")]
      SaveImageFileOutput::SCHEME => Ok(OutputWrapper::SaveImageFileOutput(
        SaveImageFileOutput::from_url(url)?,
      )),
      #[cfg(feature = "directory_record")]
      DirectoryRecordOutput::SCHEME => Ok(OutputWrapper::DirectoryRecordOutput(
        DirectoryRecordOutput::from_url(url)?,
      )),
      LogOutput::SCHEME => Ok(OutputWrapper::LogOutput(LogOutput::from_url(url)?)),
      CropOutput::SCHEME => Ok(OutputWrapper::CropOutput(CropOutput::from_url(url)?)),
      other => Err(OutputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl Render<Frame, DetectResult> for OutputWrapper {
  type Error = OutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    match self {
      #[cfg(feature = "save_image_file")]
      OutputWrapper::SaveImageFileOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      #[cfg(feature = "directory_record")]
      OutputWrapper::DirectoryRecordOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      OutputWrapper::LogOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
      OutputWrapper::CropOutput(output) => output
        .render_result(frame, result)
        .map_err(OutputError::from),
    }
  }
}
