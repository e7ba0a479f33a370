// 该文件是 Jiankao （监考） 项目的一部分。
// src/config.rs - 流水线配置文件
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
use std::time::Duration;

use chrono::TimeDelta;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::backoff::{Backoff, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
use crate::capture::CropGeometry;
use crate::deadzone::DeadzoneSettings;

pub const DEFAULT_MAX_FPS: u32 = 60;
pub const DEFAULT_DETECTION_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件: {0}")]
  IoError(#[from] std::io::Error),
  #[error("配置文件格式错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("配置项 {0} 无效: {1}")]
  Invalid(&'static str, String),
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PipelineConfigFile {
  deadzone: Option<DeadzoneConfigFile>,
  capture: Option<CaptureConfigFile>,
  backoff: Option<BackoffConfigFile>,
  camera: Option<CameraConfigFile>,
  detection: Option<DetectionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct DeadzoneConfigFile {
  duration_secs: Option<i64>,
  half_size: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct CaptureConfigFile {
  width_fraction: Option<f32>,
  margin: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackoffConfigFile {
  initial_ms: Option<u64>,
  max_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
  max_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionConfigFile {
  interval_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
  pub deadzone: DeadzoneSettings,
  pub crop: CropGeometry,
  pub backoff_initial: Duration,
  pub backoff_max: Duration,
  pub max_fps: u32,
  pub detection_interval: Duration,
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self {
      deadzone: DeadzoneSettings::default(),
      crop: CropGeometry::default(),
      backoff_initial: DEFAULT_INITIAL_BACKOFF,
      backoff_max: DEFAULT_MAX_BACKOFF,
      max_fps: DEFAULT_MAX_FPS,
      detection_interval: DEFAULT_DETECTION_INTERVAL,
    }
  }
}

impl PipelineConfig {
  /// 未提供路径时使用默认配置
  pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
    match path {
      Some(path) => {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        info!("加载配置文件: {}", path.display());
        Ok(config)
      }
      None => Ok(Self::default()),
    }
  }

  pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
    let file: PipelineConfigFile = toml::from_str(text)?;
    let config = Self::from_file(file);
    config.validate()?;
    Ok(config)
  }

  fn from_file(file: PipelineConfigFile) -> Self {
    let defaults = Self::default();
    let deadzone = file.deadzone.unwrap_or_default();
    let capture = file.capture.unwrap_or_default();
    let backoff = file.backoff.unwrap_or_default();

    Self {
      deadzone: DeadzoneSettings {
        duration: deadzone
          .duration_secs
          .map(TimeDelta::seconds)
          .unwrap_or(defaults.deadzone.duration),
        half_size: deadzone.half_size.unwrap_or(defaults.deadzone.half_size),
      },
      crop: CropGeometry {
        width_fraction: capture
          .width_fraction
          .unwrap_or(defaults.crop.width_fraction),
        margin: capture.margin.unwrap_or(defaults.crop.margin),
      },
      backoff_initial: backoff
        .initial_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.backoff_initial),
      backoff_max: backoff
        .max_ms
        .map(Duration::from_millis)
        .unwrap_or(defaults.backoff_max),
      max_fps: file
        .camera
        .and_then(|c| c.max_fps)
        .unwrap_or(defaults.max_fps),
      detection_interval: file
        .detection
        .and_then(|d| d.interval_ms)
        .map(Duration::from_millis)
        .unwrap_or(defaults.detection_interval),
    }
  }

  fn validate(&self) -> Result<(), ConfigError> {
    if self.deadzone.duration <= TimeDelta::zero() {
      return Err(ConfigError::Invalid(
        "deadzone.duration_secs",
        "必须为正数".to_string(),
      ));
    }
    if !(self.deadzone.half_size.is_finite() && self.deadzone.half_size > 0.0) {
      return Err(ConfigError::Invalid(
        "deadzone.half_size",
        format!("{} 不是正数", self.deadzone.half_size),
      ));
    }
    let fraction = self.crop.width_fraction;
    if !(fraction > 0.0 && fraction <= 1.0) {
      return Err(ConfigError::Invalid(
        "capture.width_fraction",
        format!("{} 不在 (0, 1] 范围内", fraction),
      ));
    }
    if !(self.crop.margin.is_finite() && self.crop.margin > 0.0) {
      return Err(ConfigError::Invalid(
        "capture.margin",
        format!("{} 不是正数", self.crop.margin),
      ));
    }
    if self.backoff_initial.is_zero() || self.backoff_max < self.backoff_initial {
      return Err(ConfigError::Invalid(
        "backoff",
        "initial_ms 必须为正且不大于 max_ms".to_string(),
      ));
    }
    if self.max_fps == 0 {
      return Err(ConfigError::Invalid("camera.max_fps", "不能为 0".to_string()));
    }
    Ok(())
  }

  pub fn backoff(&self) -> Backoff {
    Backoff::new(self.backoff_initial, self.backoff_max)
  }

  pub fn frame_interval(&self) -> Duration {
    Duration::from_secs(1) / self.max_fps
  }
}
