// 该文件是 Jiankao （监考） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::sync::Arc;
use std::sync::mpsc::RecvTimeoutError;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use jiankao::{
  FromUrl,
  capture::{Annotate, CaptureCoordinator},
  config::PipelineConfig,
  evidence::{EvidenceEvent, EvidenceGroup, EvidenceStore},
  input::ImageSequence,
  monitor::Monitor,
  session::{Connectivity, CycleSettings, SharedSettings},
  source::ReplaySource,
};

#[cfg(feature = "watermark")]
fn build_annotator(args: &args::Args) -> Result<Box<dyn Annotate + Send>> {
  use jiankao::watermark::TimestampWatermark;

  let watermark = match &args.font {
    Some(font) => TimestampWatermark::from_file(font)
      .with_context(|| format!("无法加载水印字体: {}", font.display()))?,
    None => TimestampWatermark::embedded().context("无法加载内置水印字体")?,
  };
  Ok(Box::new(watermark))
}

#[cfg(not(feature = "watermark"))]
fn build_annotator(args: &args::Args) -> Result<Box<dyn Annotate + Send>> {
  use jiankao::capture::NoAnnotation;

  warn!("未启用 watermark 特性，证据图像不加时间水印");
  if let Some(font) = &args.font {
    warn!("忽略字体 {}", font.display());
  }
  Ok(Box::new(NoAnnotation))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = args::Args::parse();

  info!("Jiankao 监考取证");
  info!("输入来源: {}", args.input.display());
  info!("检测结果来源: {}", args.detections);
  info!("证据目录: {}", args.evidence);
  info!("取证类别: {:?}", args.capture_class);
  info!("置信度阈值: {}", args.confidence);

  let config = PipelineConfig::load(args.config.as_deref())?;
  let store = Arc::new(EvidenceStore::from_url(&args.evidence)?);
  let evidence_events = store.subscribe();
  let source = ReplaySource::from_url(&args.detections)?;
  let coordinator = CaptureCoordinator::new(config.crop, build_annotator(&args)?, store.clone());
  let settings = SharedSettings::new(CycleSettings {
    capture_class: args.capture_class.clone(),
    confidence_threshold: args.confidence,
  });

  let mut monitor = Monitor::new(config);
  monitor.start_camera(ImageSequence::open(&args.input)?)?;
  let reports = monitor.start_detection(source, coordinator, settings)?;

  let (tx, rx) = std::sync::mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
  })
  .context("无法设置 Ctrl-C 处理函数")?;

  let mut cycles = 0usize;
  let mut total_detections = 0usize;
  let mut total_captures = 0usize;
  loop {
    match reports.recv_timeout(Duration::from_millis(100)) {
      Ok(report) => {
        cycles += 1;
        total_detections += report.detection_count;
        total_captures += report.captures.len();
        if let Connectivity::Lost { retry_in } = report.connectivity {
          warn!("推理服务连接中断，{:.2?} 后重试", retry_in);
        }
        info!(
          "周期 {}: {} 个检测，{} 个新证据",
          cycles,
          report.detection_count,
          report.captures.len()
        );
      }
      Err(RecvTimeoutError::Timeout) => {}
      Err(RecvTimeoutError::Disconnected) => {
        warn!("检测线程已退出");
        break;
      }
    }

    for event in evidence_events.try_iter() {
      if let EvidenceEvent::Created(path) = event {
        info!("新证据: {}", path.display());
      }
    }

    if args.cycles > 0 && cycles >= args.cycles {
      info!("达到指定周期数 {}, 退出", args.cycles);
      break;
    }
    if rx.try_recv().is_ok() {
      warn!("中断信号接收，退出");
      break;
    }
  }

  monitor.shutdown();

  let evidence = store.list(EvidenceGroup::All)?;
  info!("处理完成!");
  info!("检测周期: {}", cycles);
  info!("总检测数: {}", total_detections);
  info!("新证据数: {}", total_captures);
  for path in &evidence {
    info!("  - {}", path.display());
  }

  if args.purge {
    let removed = store.purge_all()?;
    info!("已清空证据目录 ({} 个文件)", removed);
  }

  Ok(())
}
