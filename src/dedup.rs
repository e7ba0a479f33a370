// 该文件是 Jiankao （监考） 项目的一部分。
// src/dedup.rs - 检测结果去重
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

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::deadzone::{DeadzoneRegistry, within_box};
use crate::detection::Detection;

/// 对一个检测批次去重。
///
/// 1. 先清理过期抑制区；
/// 2. 取证类别的检测若落在同类抑制区内则丢弃；
/// 3. 剩余取证类别检测按置信度降序贪心保留，批次内相互靠近的只留最高者。
///
/// 其他类别原样通过。返回顺序为：其他类别在前，取证类别在后。
pub fn deduplicate(
  detections: Vec<Detection>,
  capture_class: Option<&str>,
  registry: &mut DeadzoneRegistry,
  now: DateTime<Utc>,
) -> Vec<Detection> {
  registry.purge_expired(now);

  let half = registry.settings().half_size;
  let mut others = Vec::new();
  let mut candidates = Vec::new();

  for det in detections {
    if !det.is_well_formed() {
      warn!("跳过格式错误的检测记录: {:?}", det);
      continue;
    }
    match capture_class {
      Some(class) if det.class == class => {
        if registry.contains_near(&det.class, det.x, det.y) {
          debug!(
            "检测 {} ({:.0}, {:.0}) 位于抑制区内，已忽略",
            det.class, det.x, det.y
          );
        } else {
          candidates.push(det);
        }
      }
      _ => others.push(det),
    }
  }

  // 稳定排序，置信度相同时保持输入顺序
  candidates.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
  for det in candidates {
    if kept
      .iter()
      .any(|k| within_box(det.x, det.y, k.x, k.y, half))
    {
      debug!(
        "批次内重复检测 ({:.0}, {:.0}) 置信度 {:.2}，已忽略",
        det.x, det.y, det.confidence
      );
      continue;
    }
    kept.push(det);
  }

  others.extend(kept);
  others
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::deadzone::DeadzoneSettings;
  use chrono::TimeDelta;

  fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
  }

  fn registry() -> DeadzoneRegistry {
    DeadzoneRegistry::new(DeadzoneSettings {
      duration: TimeDelta::seconds(180),
      half_size: 30.0,
    })
  }

  #[test]
  fn suppresses_detection_inside_deadzone() {
    let mut reg = registry();
    reg.add("cheating", 100.0, 100.0, t0());

    let out = deduplicate(
      vec![
        Detection::new("cheating", 120.0, 115.0, 0.9),
        Detection::new("cheating", 140.0, 100.0, 0.8),
      ],
      Some("cheating"),
      &mut reg,
      t0() + TimeDelta::seconds(1),
    );

    assert_eq!(out.len(), 1);
    assert_eq!(out[0].x, 140.0);
  }

  #[test]
  fn other_classes_pass_through() {
    let mut reg = registry();
    reg.add("cheating", 100.0, 100.0, t0());

    let out = deduplicate(
      vec![
        Detection::new("not_cheating", 100.0, 100.0, 0.7),
        Detection::new("not_cheating", 101.0, 101.0, 0.6),
      ],
      Some("cheating"),
      &mut reg,
      t0(),
    );

    assert_eq!(out.len(), 2);
  }

  #[test]
  fn keeps_most_confident_of_a_cluster() {
    let mut reg = registry();
    let out = deduplicate(
      vec![
        Detection::new("cheating", 10.0, 10.0, 0.9),
        Detection::new("cheating", 12.0, 11.0, 0.95),
      ],
      Some("cheating"),
      &mut reg,
      t0(),
    );

    assert_eq!(out, vec![Detection::new("cheating", 12.0, 11.0, 0.95)]);
  }

  #[test]
  fn equal_confidence_keeps_first_seen() {
    let mut reg = registry();
    let out = deduplicate(
      vec![
        Detection::new("cheating", 10.0, 10.0, 0.8),
        Detection::new("cheating", 15.0, 10.0, 0.8),
        Detection::new("cheating", 300.0, 300.0, 0.5),
      ],
      Some("cheating"),
      &mut reg,
      t0(),
    );

    let xs: Vec<f32> = out.iter().map(|d| d.x).collect();
    assert_eq!(xs, vec![10.0, 300.0]);
  }

  #[test]
  fn expired_deadzone_stops_suppressing() {
    let mut reg = registry();
    reg.add("cheating", 50.0, 50.0, t0());
    let batch = || vec![Detection::new("cheating", 50.0, 50.0, 0.9)];

    let out = deduplicate(batch(), Some("cheating"), &mut reg, t0() + TimeDelta::seconds(179));
    assert!(out.is_empty());
    assert_eq!(reg.len(), 1);

    let out = deduplicate(batch(), Some("cheating"), &mut reg, t0() + TimeDelta::seconds(181));
    assert_eq!(out.len(), 1);
    assert!(reg.is_empty());
  }

  #[test]
  fn malformed_detection_is_skipped() {
    let mut reg = registry();
    let out = deduplicate(
      vec![
        Detection::new("cheating", f32::NAN, 10.0, 0.9),
        Detection::new("cheating", 10.0, 10.0, 0.9),
      ],
      Some("cheating"),
      &mut reg,
      t0(),
    );
    assert_eq!(out.len(), 1);
    assert_eq!(out[0].x, 10.0);
  }

  #[test]
  fn no_capture_class_suppresses_nothing() {
    let mut reg = registry();
    reg.add("cheating", 10.0, 10.0, t0());
    let out = deduplicate(
      vec![
        Detection::new("cheating", 10.0, 10.0, 0.9),
        Detection::new("cheating", 11.0, 10.0, 0.8),
      ],
      None,
      &mut reg,
      t0(),
    );
    assert_eq!(out.len(), 2);
  }
}
