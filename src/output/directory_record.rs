// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/output/directory_record.rs - 目录记录输出
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

use std::{
  path::{Path, PathBuf},
  sync::Mutex,
};

use chrono::{DateTime, Datelike, Local};
use thiserror::Error;
use tracing::debug;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::DetectResult,
  output::{
    Render,
    draw::{Draw, DrawError, Record},
  },
};

#[derive(Error, Debug)]
pub enum DirectoryRecordOutputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("绘制错误: {0}")]
  DrawError(#[from] DrawError),
}

/// 标注后保存，或保存原图并附带文本记录
pub enum RecordMode {
  Draw(Box<Draw>),
  Record(Record),
}

impl RecordMode {
  fn save_result(
    &self,
    path: &Path,
    frame: &Frame,
    result: &DetectResult,
  ) -> Result<(), DirectoryRecordOutputError> {
    match self {
      RecordMode::Draw(draw) => {
        let mut image = frame.image.clone();
        draw.draw_detections(&mut image, result);
        image.save(path)?;
      }
      RecordMode::Record(record) => {
        frame.image.save(path)?;
        record.record(result, frame.width(), frame.height(), path)?;
      }
    }
    Ok(())
  }
}

/// 按日期分目录保存每一帧：`<root>/yyyy/mm/dd/HH-MM-SS-XXXX.png`
///
/// 默认只保存有检测结果的帧，带上 `always` 参数则每帧都保存。
pub struct DirectoryRecordOutput {
  directory: PathBuf,
  mode: RecordMode,
  frame_counter: Mutex<u16>,
  always: bool,
}

impl FromUrlWithScheme for DirectoryRecordOutput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  /// `folder:///data/records?record=name&always&font=/path/font.ttf`
  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(DirectoryRecordOutputError::SchemeMismatch);
    }

    let mut record = None;
    let mut font = None;
    let mut always = false;
    for (k, v) in uri.query_pairs() {
      match &*k {
        "record" => record = Some(v != "id"),
        "font" => font = Some(v.into_owned()),
        "always" => always = true,
        _ => {}
      }
    }

    let mode = match (record, font) {
      (Some(label_with_name), _) => RecordMode::Record(Record { label_with_name }),
      (None, Some(font)) => RecordMode::Draw(Box::new(Draw::with_font_file(font)?)),
      (None, None) => RecordMode::Draw(Box::default()),
    };

    Ok(DirectoryRecordOutput::new(uri.path(), mode, always))
  }
}

impl DirectoryRecordOutput {
  pub fn new<P: AsRef<Path>>(directory: P, mode: RecordMode, always: bool) -> Self {
    DirectoryRecordOutput {
      directory: directory.as_ref().to_path_buf(),
      mode,
      frame_counter: Mutex::new(0),
      always,
    }
  }

  fn frame_id(&self) -> u16 {
    let mut counter = self
      .frame_counter
      .lock()
      .unwrap_or_else(|poisoned| poisoned.into_inner());
    *counter = counter.wrapping_add(1);
    *counter
  }

  fn frame_path(&self, now: DateTime<Local>) -> Result<PathBuf, DirectoryRecordOutputError> {
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    Ok(directory.join(format!(
      "{}-{:04X}.png",
      now.format("%H-%M-%S"),
      self.frame_id()
    )))
  }
}

impl Render<Frame, DetectResult> for DirectoryRecordOutput {
  type Error = DirectoryRecordOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    if !self.always && result.is_empty() {
      return Ok(());
    }
    let path = self.frame_path(Local::now())?;
    debug!("记录第 {} 帧到 {}", frame.index, path.display());
    self.mode.save_result(&path, frame, result)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, DetectOutcome, Detection};
  use image::RgbImage;
  use std::time::Duration;

  fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
      for entry in std::fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
          pending.push(path);
        } else {
          found.push(path);
        }
      }
    }
    found.sort();
    found
  }

  fn found() -> DetectResult {
    let det = Detection {
      bbox: BoundingBox::new(1.0, 1.0, 3.0, 3.0),
      class_id: 4,
      label: "white".to_string(),
      confidence: 0.6,
    };
    DetectResult {
      outcome: DetectOutcome::from_detections(vec![det], Duration::ZERO),
      input_size: 4,
    }
  }

  #[test]
  fn empty_results_are_skipped_unless_always() {
    let dir = tempfile::tempdir().unwrap();
    let frame = Frame::new(RgbImage::new(4, 4), 0, Duration::ZERO);
    let empty = DetectResult {
      outcome: DetectOutcome::Empty,
      input_size: 4,
    };

    let url = Url::parse(&format!("folder://{}", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &empty).unwrap();
    assert!(files_under(dir.path()).is_empty());

    let url = Url::parse(&format!("folder://{}?always", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    output.render_result(&frame, &empty).unwrap();
    assert_eq!(files_under(dir.path()).len(), 1);
  }

  #[test]
  fn record_mode_writes_image_and_text() {
    let dir = tempfile::tempdir().unwrap();
    let url = Url::parse(&format!("folder://{}?record=name", dir.path().display())).unwrap();
    let output = DirectoryRecordOutput::from_url(&url).unwrap();
    let frame = Frame::new(RgbImage::new(4, 4), 0, Duration::ZERO);
    output.render_result(&frame, &found()).unwrap();

    let files = files_under(dir.path());
    assert_eq!(files.len(), 2);
    let text = files
      .iter()
      .find(|p| p.extension().is_some_and(|e| e == "txt"))
      .unwrap();
    let content = std::fs::read_to_string(text).unwrap();
    assert!(content.starts_with("white, 0.6000"));
    assert!(text.file_name().unwrap().to_string_lossy().ends_with("-0001.txt"));
  }
}
