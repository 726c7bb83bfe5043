// 该文件是 Xiyi （洗衣计数） 项目的一部分。
// src/input/read_directory.rs - 目录图像序列输入
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
  time::Instant,
};

use image::ImageReader;
use thiserror::Error;
use tracing::{error, info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

// 与 `image` 启用的解码器保持一致
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按文件名顺序读取目录中的图像，无法解码的文件会被跳过
pub struct DirectoryInput {
  files: std::vec::IntoIter<PathBuf>,
  index: u64,
  opened: Instant,
}

impl FromUrlWithScheme for DirectoryInput {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for DirectoryInput {
  type Error = DirectoryInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(DirectoryInputError::SchemeMismatch);
    }
    Self::open(url.path())
  }
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str()))
    .unwrap_or(false)
}

impl DirectoryInput {
  pub fn open<P: AsRef<Path>>(directory: P) -> Result<Self, DirectoryInputError> {
    let directory = directory.as_ref();
    let mut files = Vec::new();
    for entry in std::fs::read_dir(directory)? {
      let path = entry?.path();
      if path.is_file() && is_image(&path) {
        files.push(path);
      }
    }
    files.sort();
    info!("目录 {} 中有 {} 张图像", directory.display(), files.len());

    Ok(DirectoryInput {
      files: files.into_iter(),
      index: 0,
      opened: Instant::now(),
    })
  }
}

impl Iterator for DirectoryInput {
  type Item = Frame;

  fn next(&mut self) -> Option<Self::Item> {
    for path in self.files.by_ref() {
      let image = match ImageReader::open(&path).map(|reader| reader.decode()) {
        Ok(Ok(image)) => image.to_rgb8(),
        Ok(Err(e)) => {
          warn!("跳过无法解码的图像 {}: {}", path.display(), e);
          continue;
        }
        Err(e) => {
          error!("无法打开图像 {}: {}", path.display(), e);
          continue;
        }
      };
      let frame = Frame::new(image, self.index, self.opened.elapsed());
      self.index += 1;
      return Some(frame);
    }
    None
  }
}
