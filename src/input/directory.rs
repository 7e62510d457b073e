// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/input/directory.rs - 目录图像输入
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{collections::VecDeque, path::PathBuf};

use image::{ImageFormat, RgbImage};
use thiserror::Error;
use tracing::{error, info};
use url::Url;

use super::ImageFileInput;
use crate::{FromUrl, FromUrlWithScheme};

#[derive(Error, Debug)]
pub enum DirectoryInputError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 按文件名顺序读取目录下的所有图像，无法解码的文件跳过
pub struct DirectoryInput {
  files: VecDeque<PathBuf>,
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

    let mut files = std::fs::read_dir(url.path())?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && ImageFormat::from_path(path).is_ok())
      .collect::<Vec<_>>();
    files.sort();

    info!("目录 {} 中找到 {} 张图像", url.path(), files.len());

    Ok(DirectoryInput {
      files: files.into(),
    })
  }
}

impl Iterator for DirectoryInput {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    while let Some(path) = self.files.pop_front() {
      match ImageFileInput::open(&path) {
        Ok(image) => return Some(image),
        Err(e) => error!("跳过无法读取的图像 {}: {}", path.display(), e),
      }
    }
    None
  }
}
