// 该文件是 Jiankao （监考） 项目的一部分。
// src/capture.rs - 证据截取协调
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

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use image::{RgbImage, imageops};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::deadzone::DeadzoneRegistry;
use crate::detection::Detection;
use crate::evidence::{EvidenceError, EvidenceStore};
use crate::frame::Frame;

pub const DEFAULT_WIDTH_FRACTION: f32 = 0.2;
pub const DEFAULT_CROP_MARGIN: f32 = 1.2;

#[derive(Error, Debug)]
pub enum CaptureError {
  #[error("截取区域为空: 中心 ({x:.0}, {y:.0})")]
  EmptyCrop { x: f32, y: f32 },
  #[error("证据保存失败: {0}")]
  EvidenceError(#[from] EvidenceError),
}

/// 在截取出的证据图像上做标注（如时间水印）
pub trait Annotate {
  fn annotate(&self, image: &mut RgbImage, captured_at: DateTime<Utc>);
}

impl<T: Annotate + ?Sized> Annotate for Box<T> {
  fn annotate(&self, image: &mut RgbImage, captured_at: DateTime<Utc>) {
    (**self).annotate(image, captured_at)
  }
}

/// 不做任何标注
#[derive(Debug, Default, Clone, Copy)]
pub struct NoAnnotation;

impl Annotate for NoAnnotation {
  fn annotate(&self, _image: &mut RgbImage, _captured_at: DateTime<Utc>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
  pub x: u32,
  pub y: u32,
  pub width: u32,
  pub height: u32,
}

/// 截取区域几何参数。边长 = 帧宽 × width_fraction × margin，与检测坐标同处推理帧像素空间。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropGeometry {
  pub width_fraction: f32,
  pub margin: f32,
}

impl Default for CropGeometry {
  fn default() -> Self {
    Self {
      width_fraction: DEFAULT_WIDTH_FRACTION,
      margin: DEFAULT_CROP_MARGIN,
    }
  }
}

impl CropGeometry {
  pub fn side(&self, frame_width: u32) -> f32 {
    frame_width as f32 * self.width_fraction * self.margin
  }

  /// 以 (x, y) 为中心的正方形区域，裁剪到帧范围内
  pub fn region(
    &self,
    frame_width: u32,
    frame_height: u32,
    x: f32,
    y: f32,
  ) -> Result<CropRegion, CaptureError> {
    let empty = CaptureError::EmptyCrop { x, y };
    if !x.is_finite() || !y.is_finite() {
      return Err(empty);
    }

    // 取整到像素，避免浮点误差造成一像素偏差
    let half = self.side(frame_width) / 2.0;
    let x0 = ((x - half).round() as i64).max(0);
    let y0 = ((y - half).round() as i64).max(0);
    let x1 = ((x + half).round() as i64).min(frame_width as i64);
    let y1 = ((y + half).round() as i64).min(frame_height as i64);
    if x1 <= x0 || y1 <= y0 {
      return Err(empty);
    }

    Ok(CropRegion {
      x: x0 as u32,
      y: y0 as u32,
      width: (x1 - x0) as u32,
      height: (y1 - y0) as u32,
    })
  }
}

/// 一次成功取证
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureEvent {
  pub path: PathBuf,
  pub class: String,
  pub x: f32,
  pub y: f32,
  pub confidence: f32,
  pub region: CropRegion,
  pub captured_at: DateTime<Utc>,
}

pub struct CaptureCoordinator<A> {
  geometry: CropGeometry,
  annotator: A,
  store: Arc<EvidenceStore>,
}

impl<A: Annotate> CaptureCoordinator<A> {
  pub fn new(geometry: CropGeometry, annotator: A, store: Arc<EvidenceStore>) -> Self {
    Self {
      geometry,
      annotator,
      store,
    }
  }

  pub fn store(&self) -> &Arc<EvidenceStore> {
    &self.store
  }

  fn capture_one(
    &self,
    det: &Detection,
    frame: &Frame,
    now: DateTime<Utc>,
  ) -> Result<CaptureEvent, CaptureError> {
    let region = self
      .geometry
      .region(frame.width(), frame.height(), det.x, det.y)?;

    let mut crop =
      imageops::crop_imm(&frame.image, region.x, region.y, region.width, region.height).to_image();
    self.annotator.annotate(&mut crop, now);

    let path = self.store.create_untagged(&crop)?;

    Ok(CaptureEvent {
      path,
      class: det.class.clone(),
      x: det.x,
      y: det.y,
      confidence: det.confidence,
      region,
      captured_at: now,
    })
  }

  /// 对已去重批次中属于取证类别的检测逐一截取证据。
  /// 单条失败只记录日志，不登记抑制区，也不影响同批次其余检测。
  pub fn on_detections(
    &self,
    detections: &[Detection],
    frame: &Frame,
    capture_class: Option<&str>,
    registry: &mut DeadzoneRegistry,
    now: DateTime<Utc>,
  ) -> Vec<CaptureEvent> {
    let Some(capture_class) = capture_class else {
      return Vec::new();
    };

    let mut events = Vec::new();
    for det in detections.iter().filter(|d| d.class == capture_class) {
      if registry.contains_near(&det.class, det.x, det.y) {
        debug!("({:.0}, {:.0}) 已有证据，跳过截取", det.x, det.y);
        continue;
      }

      match self.capture_one(det, frame, now) {
        Ok(event) => {
          registry.add(det.class.clone(), det.x, det.y, now);
          info!(
            "截取证据 {} ({:.0}, {:.0}) 置信度 {:.2} -> {}",
            det.class,
            det.x,
            det.y,
            det.confidence,
            event.path.display()
          );
          events.push(event);
        }
        Err(e) => warn!("截取证据失败: {}", e),
      }
    }
    events
  }
}
