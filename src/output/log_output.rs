// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/output/log_output.rs - 日志输出
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

use std::{collections::BTreeMap, io::Write};

use serde::Serialize;
use thiserror::Error;
use tracing::info;
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  frame::Frame,
  model::{DetectResult, Detection},
  output::Render,
};

#[derive(Error, Debug)]
pub enum LogOutputError {
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("未知的日志格式: {0}")]
  UnknownFormat(String),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
  Text,
  Json,
}

/// 一帧的 JSON 记录，框坐标已映射到画面尺寸
#[derive(Serialize)]
struct FrameRecord<'a> {
  frame: u64,
  timestamp_ms: u128,
  elapsed_ms: Option<f64>,
  counts: BTreeMap<&'a str, usize>,
  detections: &'a [Detection],
}

/// `log:` 以 tracing 输出计数，`log:?format=json` 每帧向标准输出写一行 JSON
pub struct LogOutput {
  format: LogFormat,
}

impl FromUrlWithScheme for LogOutput {
  const SCHEME: &'static str = "log";
}

impl FromUrl for LogOutput {
  type Error = LogOutputError;

  fn from_url(uri: &Url) -> Result<Self, Self::Error> {
    if uri.scheme() != Self::SCHEME {
      return Err(LogOutputError::SchemeMismatch(uri.scheme().to_string()));
    }

    let format = match uri.query_pairs().find(|(k, _)| k == "format") {
      None => LogFormat::Text,
      Some((_, v)) => match &*v {
        "text" => LogFormat::Text,
        "json" => LogFormat::Json,
        other => return Err(LogOutputError::UnknownFormat(other.to_string())),
      },
    };

    Ok(LogOutput { format })
  }
}

fn label_counts(detections: &[Detection]) -> BTreeMap<&str, usize> {
  let mut counts = BTreeMap::new();
  for det in detections {
    *counts.entry(det.label.as_str()).or_insert(0) += 1;
  }
  counts
}

impl LogOutput {
  pub fn new(format: LogFormat) -> Self {
    LogOutput { format }
  }

  pub fn format(&self) -> LogFormat {
    self.format
  }

  pub fn write_json<W: Write>(
    &self,
    writer: &mut W,
    frame: &Frame,
    result: &DetectResult,
  ) -> Result<(), LogOutputError> {
    let detections = result.rescaled(frame.width(), frame.height());
    let record = FrameRecord {
      frame: frame.index,
      timestamp_ms: frame.timestamp.as_millis(),
      elapsed_ms: result
        .outcome
        .elapsed()
        .map(|elapsed| elapsed.as_secs_f64() * 1000.0),
      counts: label_counts(&detections),
      detections: &detections,
    };
    serde_json::to_writer(&mut *writer, &record)?;
    writeln!(writer)?;
    Ok(())
  }
}

impl Render<Frame, DetectResult> for LogOutput {
  type Error = LogOutputError;

  fn render_result(&self, frame: &Frame, result: &DetectResult) -> Result<(), Self::Error> {
    match self.format {
      LogFormat::Json => {
        let stdout = std::io::stdout();
        let mut lock = stdout.lock();
        self.write_json(&mut lock, frame, result)
      }
      LogFormat::Text => {
        if result.is_empty() {
          info!("第 {} 帧: 未检测到衣物", frame.index);
          return Ok(());
        }
        let counts = label_counts(result.detections());
        let summary = counts
          .iter()
          .map(|(label, count)| format!("{label}×{count}"))
          .collect::<Vec<_>>()
          .join(" ");
        info!(
          "第 {} 帧: 检测到 {} 件衣物 [{}], 耗时 {:?}",
          frame.index,
          result.detections().len(),
          summary,
          result.outcome.elapsed().unwrap_or_default()
        );
        Ok(())
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::{BoundingBox, DetectOutcome};
  use image::RgbImage;
  use std::time::Duration;

  fn detection(label: &str, class_id: usize) -> Detection {
    Detection {
      bbox: BoundingBox::new(10.0, 10.0, 20.0, 30.0),
      class_id,
      label: label.to_string(),
      confidence: 0.5,
    }
  }

  #[test]
  fn format_is_parsed_from_query() {
    let text = LogOutput::from_url(&Url::parse("log:").unwrap()).unwrap();
    assert_eq!(text.format(), LogFormat::Text);
    let json = LogOutput::from_url(&Url::parse("log:?format=json").unwrap()).unwrap();
    assert_eq!(json.format(), LogFormat::Json);
    assert!(matches!(
      LogOutput::from_url(&Url::parse("log:?format=xml").unwrap()),
      Err(LogOutputError::UnknownFormat(_))
    ));
  }

  #[test]
  fn json_line_contains_counts_and_frame_boxes() {
    let output = LogOutput::new(LogFormat::Json);
    let frame = Frame::new(RgbImage::new(200, 100), 7, Duration::from_millis(40));
    let result = DetectResult {
      outcome: DetectOutcome::from_detections(
        vec![detection("blue", 1), detection("blue", 1), detection("white", 4)],
        Duration::from_millis(12),
      ),
      input_size: 100,
    };

    let mut buffer = Vec::new();
    output.write_json(&mut buffer, &frame, &result).unwrap();
    let line = String::from_utf8(buffer).unwrap();
    assert!(line.ends_with('\n'));

    let value: serde_json::Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(value["frame"], 7);
    assert_eq!(value["timestamp_ms"], 40);
    assert_eq!(value["counts"]["blue"], 2);
    assert_eq!(value["counts"]["white"], 1);
    assert_eq!(value["detections"][0]["bbox"]["left"], 20.0);
    assert_eq!(value["detections"][0]["bbox"]["bottom"], 30.0);
  }

  #[test]
  fn empty_result_has_null_elapsed() {
    let output = LogOutput::new(LogFormat::Json);
    let frame = Frame::new(RgbImage::new(4, 4), 0, Duration::ZERO);
    let result = DetectResult {
      outcome: DetectOutcome::Empty,
      input_size: 4,
    };
    let mut buffer = Vec::new();
    output.write_json(&mut buffer, &frame, &result).unwrap();
    let value: serde_json::Value = serde_json::from_slice(&buffer).unwrap();
    assert!(value["elapsed_ms"].is_null());
    assert_eq!(value["detections"].as_array().unwrap().len(), 0);
  }
}
