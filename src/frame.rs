// 该文件是 Jiankao （监考） 项目的一部分。
// src/frame.rs - 带时间戳的帧与最新帧槽位
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

use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use image::RgbImage;

#[derive(Debug, Clone)]
pub struct Frame {
  pub image: RgbImage,
  pub index: u64,
  pub captured_at: DateTime<Utc>,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, captured_at: DateTime<Utc>) -> Self {
    Self {
      image,
      index,
      captured_at,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 拉取式帧源：总是返回最新一帧，尚无帧时返回 `None`
pub trait FrameSource {
  fn latest_frame(&self) -> Option<Arc<Frame>>;
}

/// 最新帧槽位。写入方覆盖旧帧，读取方可能看到稍旧的帧。
#[derive(Debug, Clone, Default)]
pub struct LatestFrame {
  slot: Arc<Mutex<Option<Arc<Frame>>>>,
}

impl LatestFrame {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn publish(&self, frame: Frame) {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    *slot = Some(Arc::new(frame));
  }

  pub fn clear(&self) {
    let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
    *slot = None;
  }
}

impl FrameSource for LatestFrame {
  fn latest_frame(&self) -> Option<Arc<Frame>> {
    self
      .slot
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }
}
