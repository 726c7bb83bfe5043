// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/model/label.rs - 类别标签表
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

use std::path::Path;

use thiserror::Error;
use tracing::{debug, info};
use url::Url;

/// 衣物颜色模型的默认类别
const LAUNDRY_LABELS: [&str; 5] = ["black", "blue", "brown", "green", "white"];

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("读取标签文件失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("标签表为空")]
  Empty,
}

/// 有序的类别名称表，索引即模型输出中的类别序号
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
  names: Box<[String]>,
}

impl Default for LabelTable {
  fn default() -> Self {
    Self::laundry()
  }
}

impl LabelTable {
  pub fn new<I, S>(names: I) -> Result<Self, LabelError>
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    let names: Box<[String]> = names.into_iter().map(Into::into).collect();
    if names.is_empty() {
      return Err(LabelError::Empty);
    }
    Ok(Self { names })
  }

  pub fn laundry() -> Self {
    Self {
      names: LAUNDRY_LABELS.iter().map(|s| s.to_string()).collect(),
    }
  }

  /// 每行一个类别名，忽略空行
  pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载标签文件: {}", path.display());
    let content = std::fs::read_to_string(path)?;
    let table = Self::new(
      content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty()),
    )?;
    debug!("标签数量: {}", table.len());
    Ok(table)
  }

  /// URL 中带有 `labels=<path>` 时从文件加载，否则使用默认标签
  pub fn from_url(url: &Url) -> Result<Self, LabelError> {
    match url.query_pairs().find(|(k, _)| k == "labels") {
      Some((_, path)) => Self::from_file(&*path),
      None => Ok(Self::laundry()),
    }
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn get(&self, index: usize) -> Option<&str> {
    self.names.get(index).map(String::as_str)
  }

  /// 越界说明模型与标签表不匹配，属于配置错误，直接 panic
  pub fn name(&self, index: usize) -> &str {
    match self.get(index) {
      Some(name) => name,
      None => panic!("类别索引 {} 超出标签表范围 {}", index, self.names.len()),
    }
  }

  pub fn iter(&self) -> impl Iterator<Item = &str> {
    self.names.iter().map(String::as_str)
  }
}
