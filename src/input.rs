// 该文件是 Jiankao （监考） 项目的一部分。
// src/input.rs - 图片序列输入
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

use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{info, warn};

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Error, Debug)]
pub enum InputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像加载错误: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("没有可用的图片: {0}")]
  Empty(PathBuf),
}

/// 将一张图片或目录中的图片当作摄像头画面循环输出
#[derive(Debug, Clone)]
pub struct ImageSequence {
  images: Vec<RgbImage>,
  cursor: usize,
}

fn is_image(path: &Path) -> bool {
  path
    .extension()
    .and_then(|e| e.to_str())
    .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
    .unwrap_or(false)
}

fn load(path: &Path) -> Result<RgbImage, InputError> {
  Ok(ImageReader::open(path)?.decode()?.to_rgb8())
}

impl ImageSequence {
  pub fn open(path: impl AsRef<Path>) -> Result<Self, InputError> {
    let path = path.as_ref();
    let images = if path.is_dir() {
      let mut files: Vec<PathBuf> = std::fs::read_dir(path)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && is_image(p))
        .collect();
      files.sort();

      let mut images = Vec::with_capacity(files.len());
      for file in files {
        match load(&file) {
          Ok(image) => images.push(image),
          Err(e) => warn!("跳过无法读取的图片 {}: {}", file.display(), e),
        }
      }
      images
    } else {
      vec![load(path)?]
    };

    if images.is_empty() {
      return Err(InputError::Empty(path.to_path_buf()));
    }
    info!("输入图片 {} 张: {}", images.len(), path.display());
    Ok(Self::new(images))
  }

  pub fn new(images: Vec<RgbImage>) -> Self {
    Self { images, cursor: 0 }
  }

  pub fn len(&self) -> usize {
    self.images.len()
  }

  pub fn is_empty(&self) -> bool {
    self.images.is_empty()
  }
}

impl Iterator for ImageSequence {
  type Item = RgbImage;

  fn next(&mut self) -> Option<Self::Item> {
    if self.images.is_empty() {
      return None;
    }
    let image = self.images[self.cursor].clone();
    self.cursor = (self.cursor + 1) % self.images.len();
    Some(image)
  }
}
