// 该文件是 Jiankao （监考） 项目的一部分。
// src/detection.rs - 检测记录定义与解析
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

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

/// 单个检测目标：类别、中心坐标（推理帧像素空间）与置信度
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Detection {
  pub class: String,
  pub x: f32,
  pub y: f32,
  pub confidence: f32,
  #[serde(default)]
  pub width: Option<f32>,
  #[serde(default)]
  pub height: Option<f32>,
}

#[derive(Error, Debug)]
pub enum DetectionError {
  #[error("无效的检测记录: {0}")]
  InvalidRecord(#[from] serde_json::Error),
  #[error("检测批次不是 JSON 数组")]
  NotAnArray,
}

impl Detection {
  pub fn new(class: impl Into<String>, x: f32, y: f32, confidence: f32) -> Self {
    Self {
      class: class.into(),
      x,
      y,
      confidence,
      width: None,
      height: None,
    }
  }

  pub fn with_size(mut self, width: f32, height: f32) -> Self {
    self.width = Some(width);
    self.height = Some(height);
    self
  }

  /// 类别非空、坐标有限、置信度在 [0, 1] 内
  pub fn is_well_formed(&self) -> bool {
    !self.class.is_empty()
      && self.x.is_finite()
      && self.y.is_finite()
      && (0.0..=1.0).contains(&self.confidence)
  }
}

/// 将推理服务返回的单条记录解析为 `Detection`
pub fn parse_detection(value: &Value) -> Result<Detection, DetectionError> {
  Ok(Detection::deserialize(value)?)
}

/// 解析一个检测批次，格式错误的单条记录被跳过，不影响其余记录
pub fn parse_batch(value: &Value) -> Result<Vec<Detection>, DetectionError> {
  let items = value.as_array().ok_or(DetectionError::NotAnArray)?;

  let mut detections = Vec::with_capacity(items.len());
  for (index, item) in items.iter().enumerate() {
    match parse_detection(item) {
      Ok(det) => detections.push(det),
      Err(e) => warn!("跳过第 {} 条检测记录: {}", index, e),
    }
  }
  Ok(detections)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn parses_full_record() {
    let det = parse_detection(&json!({
      "class": "cheating",
      "x": 120.5,
      "y": 64,
      "confidence": 0.87,
      "width": 40,
      "height": 80
    }))
    .unwrap();

    assert_eq!(det.class, "cheating");
    assert_eq!(det.x, 120.5);
    assert_eq!(det.y, 64.0);
    assert_eq!(det.width, Some(40.0));
    assert_eq!(det.height, Some(80.0));
    assert!(det.is_well_formed());
  }

  fn rejection(value: Value) -> String {
    match parse_detection(&value) {
      Err(DetectionError::InvalidRecord(e)) => e.to_string(),
      other => panic!("应当拒绝: {:?}", other),
    }
  }

  #[test]
  fn missing_or_mistyped_fields_are_rejected() {
    let err = rejection(json!({"class": "cheating", "x": 1.0, "confidence": 0.5}));
    assert!(err.contains("missing field `y`"), "{}", err);

    let err = rejection(json!({"x": 1.0, "y": 2.0, "confidence": 0.5}));
    assert!(err.contains("missing field `class`"), "{}", err);

    rejection(json!({"class": "cheating", "x": "left", "y": 2.0, "confidence": 0.5}));
    rejection(json!("garbage"));
  }

  #[test]
  fn size_is_optional_and_extra_keys_ignored() {
    let det = parse_detection(&json!({
      "class": "phone",
      "x": 3,
      "y": 4,
      "confidence": 0.6,
      "width": null,
      "track_id": 17
    }))
    .unwrap();
    assert_eq!(det, Detection::new("phone", 3.0, 4.0, 0.6));
  }

  #[test]
  fn batch_skips_only_malformed_records() {
    let batch = parse_batch(&json!([
      {"class": "cheating", "x": 10, "y": 10, "confidence": 0.9},
      {"class": "cheating", "y": 10, "confidence": 0.9},
      "garbage",
      {"class": "not_cheating", "x": 50, "y": 50, "confidence": 0.4}
    ]))
    .unwrap();

    assert_eq!(batch.len(), 2);
    assert_eq!(batch[0].class, "cheating");
    assert_eq!(batch[1].class, "not_cheating");
  }

  #[test]
  fn non_finite_coordinates_are_not_well_formed() {
    assert!(!Detection::new("cheating", f32::NAN, 1.0, 0.5).is_well_formed());
    assert!(!Detection::new("", 1.0, 1.0, 0.5).is_well_formed());
    assert!(!Detection::new("cheating", 1.0, 1.0, 1.5).is_well_formed());
  }
}
