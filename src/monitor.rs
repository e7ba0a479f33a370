// 该文件是 Jiankao （监考） 项目的一部分。
// src/monitor.rs - 摄像与检测工作线程调度
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

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use chrono::Utc;
use image::RgbImage;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::capture::{Annotate, CaptureCoordinator};
use crate::config::PipelineConfig;
use crate::frame::{Frame, LatestFrame};
use crate::session::{CycleReport, DetectionSession, SessionClock, SharedSettings};
use crate::source::DetectionSource;

const STOP_POLL_INTERVAL: Duration = Duration::from_millis(20);

#[derive(Error, Debug)]
pub enum MonitorError {
  #[error("{0} 已在运行")]
  AlreadyRunning(&'static str),
  #[error("摄像头未启动")]
  CameraNotRunning,
  #[error("无法创建工作线程: {0}")]
  SpawnError(#[from] std::io::Error),
}

struct Worker {
  name: &'static str,
  stop: Arc<AtomicBool>,
  join: JoinHandle<()>,
}

impl Worker {
  fn signal(&self) {
    self.stop.store(true, Ordering::SeqCst);
  }

  fn is_running(&self) -> bool {
    !self.join.is_finished()
  }

  fn join(self) {
    if self.join.join().is_err() {
      error!("{} 线程异常退出", self.name);
    }
  }
}

/// 在停止标志置位前睡眠指定时长，按较短间隔轮询
fn sleep_unless_stopped(stop: &AtomicBool, duration: Duration) {
  let deadline = Instant::now() + duration;
  while !stop.load(Ordering::SeqCst) {
    let now = Instant::now();
    if now >= deadline {
      break;
    }
    thread::sleep((deadline - now).min(STOP_POLL_INTERVAL));
  }
}

/// 摄像线程写入最新帧，检测线程按自身节奏读取并处理。
/// 检测周期不会与自身重叠：下一个周期在上一个结果发送后才开始。
pub struct Monitor {
  config: PipelineConfig,
  frames: LatestFrame,
  camera: Option<Worker>,
  detection: Option<Worker>,
  retired: Vec<Worker>,
}

impl Monitor {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      frames: LatestFrame::new(),
      camera: None,
      detection: None,
      retired: Vec::new(),
    }
  }

  pub fn frames(&self) -> &LatestFrame {
    &self.frames
  }

  pub fn is_camera_running(&self) -> bool {
    self.camera.as_ref().is_some_and(Worker::is_running)
  }

  pub fn is_detection_running(&self) -> bool {
    self.detection.as_ref().is_some_and(Worker::is_running)
  }

  /// 启动摄像线程，按最大帧率发布输入帧
  pub fn start_camera<I>(&mut self, input: I) -> Result<(), MonitorError>
  where
    I: Iterator<Item = RgbImage> + Send + 'static,
  {
    if self.is_camera_running() {
      return Err(MonitorError::AlreadyRunning("摄像线程"));
    }

    let stop = Arc::new(AtomicBool::new(false));
    let thread_stop = stop.clone();
    let frames = self.frames.clone();
    let frame_interval = self.config.frame_interval();

    let join = thread::Builder::new()
      .name("camera".to_string())
      .spawn(move || {
        info!("摄像线程启动，帧间隔 {:.2?}", frame_interval);
        for (index, image) in input.enumerate() {
          if thread_stop.load(Ordering::SeqCst) {
            break;
          }
          let started = Instant::now();
          frames.publish(Frame::new(image, index as u64, Utc::now()));
          if let Some(rest) = frame_interval.checked_sub(started.elapsed()) {
            thread::sleep(rest);
          }
        }
        info!("摄像线程退出");
      })?;

    self.camera = Some(Worker {
      name: "camera",
      stop,
      join,
    });
    Ok(())
  }

  /// 启动检测线程。每个周期的结果通过返回的通道发送，接收端丢弃后线程自行退出。
  pub fn start_detection<S, A>(
    &mut self,
    source: S,
    coordinator: CaptureCoordinator<A>,
    settings: SharedSettings,
  ) -> Result<Receiver<CycleReport>, MonitorError>
  where
    S: DetectionSource + Send + 'static,
    A: Annotate + Send + 'static,
  {
    if !self.is_camera_running() {
      return Err(MonitorError::CameraNotRunning);
    }
    if self.is_detection_running() {
      return Err(MonitorError::AlreadyRunning("检测线程"));
    }

    let mut session = DetectionSession::new(
      self.frames.clone(),
      source,
      coordinator,
      self.config.deadzone,
      settings,
    )
    .with_backoff(self.config.backoff())
    .with_interval(self.config.detection_interval);
    let stop = session.stop_flag();
    let (tx, rx) = channel();

    let join = thread::Builder::new()
      .name("detection".to_string())
      .spawn(move || {
        info!("检测会话开始");
        let stop = session.stop_flag();
        let clock = SessionClock::start();
        while !session.is_stopped() {
          let started = Instant::now();
          let Some(report) = session.run_cycle(clock.now()) else {
            break;
          };
          if tx.send(report).is_err() {
            warn!("检测结果接收端已关闭");
            break;
          }
          let delay = session.next_delay().saturating_sub(started.elapsed());
          sleep_unless_stopped(&stop, delay);
        }
        info!(
          "检测会话结束，共 {} 个检测，丢弃 {} 个抑制区",
          session.total_detections(),
          session.registry().len()
        );
      })?;

    self.detection = Some(Worker {
      name: "detection",
      stop,
      join,
    });
    Ok(rx)
  }

  /// 立即停止检测，可重复调用。进行中的推理允许完成，但其结果被丢弃。
  pub fn stop_detection(&mut self) {
    if let Some(worker) = self.detection.take() {
      info!("停止检测");
      worker.signal();
      self.reap_retired();
      self.retired.push(worker);
    }
  }

  /// 回收已退出的检测线程，仍在收尾的留待 `shutdown` 等待
  fn reap_retired(&mut self) {
    let (finished, running): (Vec<Worker>, Vec<Worker>) =
      self.retired.drain(..).partition(|w| !w.is_running());
    self.retired = running;
    for worker in finished {
      worker.join();
    }
  }

  /// 停止摄像。检测仍在运行时先停止检测。
  pub fn stop_camera(&mut self) {
    self.stop_detection();
    if let Some(worker) = self.camera.take() {
      info!("停止摄像");
      worker.signal();
      worker.join();
    }
    self.frames.clear();
  }

  /// 停止全部线程并等待退出
  pub fn shutdown(&mut self) {
    self.stop_camera();
    for worker in self.retired.drain(..) {
      worker.join();
    }
  }
}

impl Drop for Monitor {
  fn drop(&mut self) {
    self.shutdown();
  }
}
