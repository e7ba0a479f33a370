// 该文件是 Jiankao （监考） 项目的一部分。
// src/watermark.rs - 证据图像时间水印
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

use ab_glyph::{FontArc, PxScale};
use chrono::{DateTime, Local, Utc};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use thiserror::Error;
use tracing::info;

use crate::capture::Annotate;

// 内置默认字体，可由 `from_file` 覆盖
const EMBEDDED_FONT: &[u8] = include_bytes!("../assets/DejaVuSansMono.ttf");

// 文本渲染常量
const WATERMARK_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const WATERMARK_OPACITY: f32 = 0.75;
const WATERMARK_PADDING: i32 = 3;
const MIN_FONT_SIZE: f32 = 10.0;
const MAX_FONT_SIZE: f32 = 48.0;
const WIDTH_PER_FONT_PX: f32 = 11.0; // 时间戳约 19 字符，按帧宽估算字号
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const OUTLINE_COLOR: [u8; 3] = [0, 0, 0];
const OUTLINE_OFFSETS: [(i32, i32); 8] = [
  (-1, -1),
  (0, -1),
  (1, -1),
  (-1, 0),
  (1, 0),
  (-1, 1),
  (0, 1),
  (1, 1),
];

#[derive(Error, Debug)]
pub enum WatermarkError {
  #[error("无法读取字体文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("无效的字体文件")]
  InvalidFont,
}

/// 在证据图像左下角绘制半透明、带描边的截取时间
pub struct TimestampWatermark {
  font: FontArc,
  opacity: f32,
}

impl TimestampWatermark {
  pub fn new(font: FontArc) -> Self {
    Self {
      font,
      opacity: WATERMARK_OPACITY,
    }
  }

  /// 使用内置字体
  pub fn embedded() -> Result<Self, WatermarkError> {
    let font = FontArc::try_from_slice(EMBEDDED_FONT).map_err(|_| WatermarkError::InvalidFont)?;
    Ok(Self::new(font))
  }

  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, WatermarkError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let font = FontArc::try_from_vec(data).map_err(|_| WatermarkError::InvalidFont)?;
    info!("加载水印字体: {}", path.display());
    Ok(Self::new(font))
  }

  pub fn with_opacity(mut self, opacity: f32) -> Self {
    self.opacity = opacity.clamp(0.0, 1.0);
    self
  }

  fn scale_for(image: &RgbImage) -> PxScale {
    let size = (image.width() as f32 / WIDTH_PER_FONT_PX).clamp(MIN_FONT_SIZE, MAX_FONT_SIZE);
    PxScale::from(size)
  }
}

impl Annotate for TimestampWatermark {
  fn annotate(&self, image: &mut RgbImage, captured_at: DateTime<Utc>) {
    let text = captured_at
      .with_timezone(&Local)
      .format(WATERMARK_FORMAT)
      .to_string();
    let scale = Self::scale_for(image);
    let (_, text_height) = text_size(scale, &self.font, &text);

    let x = WATERMARK_PADDING;
    let y = (image.height() as i32 - text_height as i32 - WATERMARK_PADDING).max(0);

    // 先在副本上描边再写字，最后按透明度混合回原图
    let mut overlay = image.clone();
    for (dx, dy) in OUTLINE_OFFSETS {
      draw_text_mut(
        &mut overlay,
        Rgb(OUTLINE_COLOR),
        x + dx,
        y + dy,
        scale,
        &self.font,
        &text,
      );
    }
    draw_text_mut(&mut overlay, Rgb(TEXT_COLOR), x, y, scale, &self.font, &text);

    let alpha = self.opacity;
    for (dst, src) in image.pixels_mut().zip(overlay.pixels()) {
      for c in 0..3 {
        let blended = src[c] as f32 * alpha + dst[c] as f32 * (1.0 - alpha);
        dst[c] = blended.round() as u8;
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_font_is_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = TimestampWatermark::from_file(dir.path().join("missing.ttf"));
    assert!(matches!(result, Err(WatermarkError::IoError(_))));
  }

  #[test]
  fn garbage_font_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.ttf");
    std::fs::write(&path, b"definitely not a font").unwrap();
    let result = TimestampWatermark::from_file(&path);
    assert!(matches!(result, Err(WatermarkError::InvalidFont)));
  }

  #[test]
  fn watermark_marks_bottom_left_only() {
    let watermark = TimestampWatermark::embedded().unwrap();
    let background = Rgb([90, 120, 150]);
    let mut image = RgbImage::from_pixel(120, 120, background);
    let captured_at = DateTime::from_timestamp(1_760_000_000, 0).unwrap();

    watermark.annotate(&mut image, captured_at);

    let changed: Vec<(u32, u32)> = image
      .enumerate_pixels()
      .filter(|(_, _, p)| **p != background)
      .map(|(x, y, _)| (x, y))
      .collect();
    assert!(changed.len() > 100, "只改变了 {} 个像素", changed.len());
    // 文字位于底部，顶部保持原样
    assert!(changed.iter().all(|&(_, y)| y >= 60));
  }

  #[test]
  fn transparent_watermark_leaves_image_untouched() {
    let watermark = TimestampWatermark::embedded().unwrap().with_opacity(0.0);
    let original = RgbImage::from_pixel(120, 120, Rgb([90, 120, 150]));
    let mut image = original.clone();
    watermark.annotate(&mut image, Utc::now());
    assert_eq!(image, original);
  }

  #[test]
  fn font_size_follows_crop_width() {
    let small = RgbImage::new(60, 60);
    let large = RgbImage::new(2000, 2000);
    assert_eq!(TimestampWatermark::scale_for(&small).x, MIN_FONT_SIZE);
    assert_eq!(TimestampWatermark::scale_for(&large).x, MAX_FONT_SIZE);
  }
}
