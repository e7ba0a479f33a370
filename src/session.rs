// 该文件是 Jiankao （监考） 项目的一部分。
// src/session.rs - 检测会话与检测周期
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

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::capture::{Annotate, CaptureCoordinator, CaptureEvent};
use crate::deadzone::{DeadzoneRegistry, DeadzoneSettings};
use crate::dedup::deduplicate;
use crate::detection::Detection;
use crate::frame::FrameSource;
use crate::source::DetectionSource;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

/// 每个检测周期开始时读取的外部设置
#[derive(Debug, Clone, PartialEq)]
pub struct CycleSettings {
  pub capture_class: Option<String>,
  pub confidence_threshold: f32,
}

impl Default for CycleSettings {
  fn default() -> Self {
    Self {
      capture_class: None,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
    }
  }
}

/// 可在周期之间由界面修改的共享设置
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
  inner: Arc<RwLock<CycleSettings>>,
}

impl SharedSettings {
  pub fn new(settings: CycleSettings) -> Self {
    Self {
      inner: Arc::new(RwLock::new(settings)),
    }
  }

  pub fn snapshot(&self) -> CycleSettings {
    self
      .inner
      .read()
      .unwrap_or_else(PoisonError::into_inner)
      .clone()
  }

  pub fn set_capture_class(&self, class: Option<String>) {
    self
      .inner
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .capture_class = class;
  }

  pub fn set_confidence_threshold(&self, threshold: f32) {
    self
      .inner
      .write()
      .unwrap_or_else(PoisonError::into_inner)
      .confidence_threshold = threshold.clamp(0.0, 1.0);
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
  Online,
  Lost { retry_in: Duration },
}

/// 会话时钟：以启动时的墙钟为起点，按单调时钟推进。
/// 系统时间回拨不会让抑制区的存活时间变长。
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
  epoch: DateTime<Utc>,
  started: Instant,
}

impl SessionClock {
  pub fn start() -> Self {
    Self::starting_at(Utc::now())
  }

  pub fn starting_at(epoch: DateTime<Utc>) -> Self {
    Self {
      epoch,
      started: Instant::now(),
    }
  }

  pub fn now(&self) -> DateTime<Utc> {
    TimeDelta::from_std(self.started.elapsed())
      .ok()
      .and_then(|elapsed| self.epoch.checked_add_signed(elapsed))
      .unwrap_or(DateTime::<Utc>::MAX_UTC)
  }
}

/// 一个检测周期的结果，供界面标注与状态显示
#[derive(Debug, Clone, PartialEq)]
pub struct CycleReport {
  pub frame_index: Option<u64>,
  pub detections: Vec<Detection>,
  pub captures: Vec<CaptureEvent>,
  pub detection_count: usize,
  pub connectivity: Connectivity,
}

impl CycleReport {
  fn idle(connectivity: Connectivity) -> Self {
    Self {
      frame_index: None,
      detections: Vec::new(),
      captures: Vec::new(),
      detection_count: 0,
      connectivity,
    }
  }
}

/// 检测会话：拥有抑制区登记表，在同一个工作线程中依次执行推理、去重与截取。
/// 会话结束时登记表随之丢弃。
pub struct DetectionSession<F, S, A> {
  frames: F,
  source: S,
  coordinator: CaptureCoordinator<A>,
  registry: DeadzoneRegistry,
  settings: SharedSettings,
  backoff: Backoff,
  interval: Duration,
  stop: Arc<AtomicBool>,
  connectivity: Connectivity,
  total_detections: u64,
}

impl<F: FrameSource, S: DetectionSource, A: Annotate> DetectionSession<F, S, A> {
  pub fn new(
    frames: F,
    source: S,
    coordinator: CaptureCoordinator<A>,
    deadzone: DeadzoneSettings,
    settings: SharedSettings,
  ) -> Self {
    Self {
      frames,
      source,
      coordinator,
      registry: DeadzoneRegistry::new(deadzone),
      settings,
      backoff: Backoff::default(),
      interval: Duration::ZERO,
      stop: Arc::new(AtomicBool::new(false)),
      connectivity: Connectivity::Online,
      total_detections: 0,
    }
  }

  pub fn with_backoff(mut self, backoff: Backoff) -> Self {
    self.backoff = backoff;
    self
  }

  pub fn with_interval(mut self, interval: Duration) -> Self {
    self.interval = interval;
    self
  }

  pub fn with_stop_flag(mut self, stop: Arc<AtomicBool>) -> Self {
    self.stop = stop;
    self
  }

  pub fn stop_flag(&self) -> Arc<AtomicBool> {
    self.stop.clone()
  }

  pub fn is_stopped(&self) -> bool {
    self.stop.load(Ordering::SeqCst)
  }

  pub fn registry(&self) -> &DeadzoneRegistry {
    &self.registry
  }

  pub fn total_detections(&self) -> u64 {
    self.total_detections
  }

  /// 下一个周期开始前的等待时长，推理失败时按退避状态延长
  pub fn next_delay(&self) -> Duration {
    self
      .backoff
      .current()
      .map_or(self.interval, |delay| delay.max(self.interval))
  }

  /// 执行一个检测周期。会话已停止时丢弃推理结果并返回 `None`。
  pub fn run_cycle(&mut self, now: DateTime<Utc>) -> Option<CycleReport> {
    let settings = self.settings.snapshot();

    let Some(frame) = self.frames.latest_frame() else {
      debug!("尚无可用帧，跳过本周期");
      return Some(CycleReport::idle(self.connectivity));
    };

    let raw = match self.source.infer(&frame, settings.confidence_threshold) {
      Ok(batch) => {
        if self.backoff.failures() > 0 {
          info!("推理服务已恢复");
        }
        self.backoff.on_success();
        self.connectivity = Connectivity::Online;
        batch
      }
      Err(e) => {
        let retry_in = self.backoff.on_failure();
        warn!("推理失败: {}，{:.2?} 后重试", e, retry_in);
        self.connectivity = Connectivity::Lost { retry_in };
        Vec::new()
      }
    };

    if self.is_stopped() {
      info!("检测已停止，丢弃第 {} 帧的推理结果", frame.index);
      return None;
    }

    let capture_class = settings.capture_class.as_deref();
    let detections = deduplicate(raw, capture_class, &mut self.registry, now);
    let captures =
      self
        .coordinator
        .on_detections(&detections, &frame, capture_class, &mut self.registry, now);

    self.total_detections += detections.len() as u64;
    debug!(
      "第 {} 帧: {} 个检测，{} 个新证据，{} 个抑制区",
      frame.index,
      detections.len(),
      captures.len(),
      self.registry.len()
    );

    Some(CycleReport {
      frame_index: Some(frame.index),
      detection_count: detections.len(),
      detections,
      captures,
      connectivity: self.connectivity,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::capture::{CropGeometry, NoAnnotation};
  use crate::evidence::{EvidenceGroup, EvidenceStore};
  use crate::frame::{Frame, LatestFrame};
  use crate::source::ReplaySource;
  use image::RgbImage;
  use thiserror::Error;

  #[derive(Error, Debug)]
  #[error("connection refused")]
  struct Offline;

  /// 前 `failures` 次调用失败，之后总是返回同一个检测
  struct Flaky {
    failures: usize,
  }

  impl DetectionSource for Flaky {
    type Error = Offline;

    fn infer(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>, Offline> {
      if self.failures > 0 {
        self.failures -= 1;
        return Err(Offline);
      }
      Ok(vec![Detection::new("cheating", 100.0, 100.0, 0.9)])
    }
  }

  /// 推理期间检测被停止
  struct StopsMidFlight {
    stop: Arc<AtomicBool>,
  }

  impl DetectionSource for StopsMidFlight {
    type Error = Offline;

    fn infer(&mut self, _frame: &Frame, _threshold: f32) -> Result<Vec<Detection>, Offline> {
      self.stop.store(true, Ordering::SeqCst);
      Ok(vec![Detection::new("cheating", 100.0, 100.0, 0.9)])
    }
  }

  fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
  }

  fn frames() -> LatestFrame {
    let frames = LatestFrame::new();
    frames.publish(Frame::new(RgbImage::new(640, 480), 1, t0()));
    frames
  }

  fn session<S: DetectionSource>(
    source: S,
    settings: SharedSettings,
  ) -> (
    tempfile::TempDir,
    Arc<EvidenceStore>,
    DetectionSession<LatestFrame, S, NoAnnotation>,
  ) {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EvidenceStore::new(dir.path()).unwrap());
    let coordinator = CaptureCoordinator::new(CropGeometry::default(), NoAnnotation, store.clone());
    let session = DetectionSession::new(
      frames(),
      source,
      coordinator,
      DeadzoneSettings::default(),
      settings,
    );
    (dir, store, session)
  }

  fn cheating() -> SharedSettings {
    SharedSettings::new(CycleSettings {
      capture_class: Some("cheating".to_string()),
      confidence_threshold: 0.5,
    })
  }

  #[test]
  fn repeated_event_is_captured_once() {
    let batch = vec![
      Detection::new("cheating", 100.0, 100.0, 0.9),
      Detection::new("cheating", 104.0, 98.0, 0.7),
      Detection::new("not_cheating", 400.0, 300.0, 0.8),
    ];
    let source = ReplaySource::new(vec![batch.clone(), batch.clone(), batch]);
    let (_dir, store, mut session) = session(source, cheating());

    let first = session.run_cycle(t0()).unwrap();
    assert_eq!(first.frame_index, Some(1));
    assert_eq!(first.detection_count, 2);
    assert_eq!(first.captures.len(), 1);

    let second = session.run_cycle(t0() + TimeDelta::seconds(1)).unwrap();
    assert_eq!(second.detection_count, 1);
    assert!(second.captures.is_empty());

    // 抑制区过期后同一事件可以再次取证
    let third = session.run_cycle(t0() + TimeDelta::seconds(181)).unwrap();
    assert_eq!(third.captures.len(), 1);

    assert_eq!(store.list(EvidenceGroup::Untagged).unwrap().len(), 2);
    assert_eq!(session.total_detections(), 5);
  }

  #[test]
  fn settings_are_read_every_cycle() {
    let batch = vec![Detection::new("not_cheating", 200.0, 200.0, 0.9)];
    let settings = cheating();
    let (_dir, _store, mut session) =
      session(ReplaySource::new(vec![batch.clone(), batch]), settings.clone());

    assert!(session.run_cycle(t0()).unwrap().captures.is_empty());

    settings.set_capture_class(Some("not_cheating".to_string()));
    assert_eq!(session.run_cycle(t0()).unwrap().captures.len(), 1);
  }

  #[test]
  fn no_frame_is_an_idle_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(EvidenceStore::new(dir.path()).unwrap());
    let coordinator = CaptureCoordinator::new(CropGeometry::default(), NoAnnotation, store);
    let mut session = DetectionSession::new(
      LatestFrame::new(),
      Flaky { failures: 0 },
      coordinator,
      DeadzoneSettings::default(),
      cheating(),
    );

    let report = session.run_cycle(t0()).unwrap();
    assert_eq!(report.frame_index, None);
    assert_eq!(report.detection_count, 0);
  }

  #[test]
  fn inference_failure_is_an_empty_batch_with_backoff() {
    let (_dir, _store, session) = session(Flaky { failures: 2 }, cheating());
    let mut session = session
      .with_backoff(Backoff::new(
        Duration::from_millis(100),
        Duration::from_secs(1),
      ))
      .with_interval(Duration::from_millis(10));

    let report = session.run_cycle(t0()).unwrap();
    assert!(report.detections.is_empty());
    assert_eq!(
      report.connectivity,
      Connectivity::Lost {
        retry_in: Duration::from_millis(100)
      }
    );
    assert_eq!(session.next_delay(), Duration::from_millis(100));

    let report = session.run_cycle(t0()).unwrap();
    assert_eq!(
      report.connectivity,
      Connectivity::Lost {
        retry_in: Duration::from_millis(200)
      }
    );

    let report = session.run_cycle(t0()).unwrap();
    assert_eq!(report.connectivity, Connectivity::Online);
    assert_eq!(report.captures.len(), 1);
    assert_eq!(session.next_delay(), Duration::from_millis(10));
  }

  #[test]
  fn result_arriving_after_stop_is_discarded() {
    let stop = Arc::new(AtomicBool::new(false));
    let (_dir, store, session) = session(StopsMidFlight { stop: stop.clone() }, cheating());
    let mut session = session.with_stop_flag(stop);

    assert!(session.run_cycle(t0()).is_none());
    assert!(session.registry().is_empty());
    assert!(store.list(EvidenceGroup::All).unwrap().is_empty());
  }

  #[test]
  fn session_clock_advances_from_epoch() {
    let clock = SessionClock::starting_at(t0());
    let first = clock.now();
    std::thread::sleep(Duration::from_millis(5));
    let second = clock.now();

    assert!(first >= t0());
    assert!(second >= first + TimeDelta::milliseconds(5));
    assert!(second - t0() < TimeDelta::seconds(60));
  }
}
