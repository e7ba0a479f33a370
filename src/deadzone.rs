// 该文件是 Jiankao （监考） 项目的一部分。
// src/deadzone.rs - 抑制区登记表
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

use chrono::{DateTime, TimeDelta, Utc};
use tracing::debug;

pub const DEFAULT_DEADZONE_SECS: i64 = 180;
pub const DEFAULT_HALF_DEADZONE_SIZE: f32 = 50.0;

/// 抑制区参数：有效时长与半边长（像素）
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeadzoneSettings {
  pub duration: TimeDelta,
  pub half_size: f32,
}

impl Default for DeadzoneSettings {
  fn default() -> Self {
    Self {
      duration: TimeDelta::seconds(DEFAULT_DEADZONE_SECS),
      half_size: DEFAULT_HALF_DEADZONE_SIZE,
    }
  }
}

/// 一次成功取证后登记的抑制区，创建后不再修改
#[derive(Debug, Clone, PartialEq)]
pub struct Deadzone {
  pub class: String,
  pub x: f32,
  pub y: f32,
  pub created_at: DateTime<Utc>,
}

/// 方框距离（切比雪夫距离）判定
pub fn within_box(ax: f32, ay: f32, bx: f32, by: f32, half_size: f32) -> bool {
  (ax - bx).abs() <= half_size && (ay - by).abs() <= half_size
}

/// 按登记顺序保存的抑制区集合，仅存在于内存中
#[derive(Debug, Default)]
pub struct DeadzoneRegistry {
  settings: DeadzoneSettings,
  zones: Vec<Deadzone>,
}

impl DeadzoneRegistry {
  pub fn new(settings: DeadzoneSettings) -> Self {
    Self {
      settings,
      zones: Vec::new(),
    }
  }

  pub fn settings(&self) -> &DeadzoneSettings {
    &self.settings
  }

  pub fn add(&mut self, class: impl Into<String>, x: f32, y: f32, created_at: DateTime<Utc>) {
    let class = class.into();
    debug!("登记抑制区: {} ({:.0}, {:.0})", class, x, y);
    self.zones.push(Deadzone {
      class,
      x,
      y,
      created_at,
    });
  }

  /// 移除年龄不小于有效时长的抑制区，返回移除数量
  pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
    let duration = self.settings.duration;
    let before = self.zones.len();
    self.zones.retain(|zone| now - zone.created_at < duration);
    let removed = before - self.zones.len();
    if removed > 0 {
      debug!("过期抑制区 {} 个，剩余 {} 个", removed, self.zones.len());
    }
    removed
  }

  pub fn contains_near(&self, class: &str, x: f32, y: f32) -> bool {
    let half = self.settings.half_size;
    self
      .zones
      .iter()
      .any(|zone| zone.class == class && within_box(x, y, zone.x, zone.y, half))
  }

  pub fn all(&self) -> &[Deadzone] {
    &self.zones
  }

  pub fn len(&self) -> usize {
    self.zones.len()
  }

  pub fn is_empty(&self) -> bool {
    self.zones.is_empty()
  }

  pub fn clear(&mut self) {
    self.zones.clear();
  }
}
