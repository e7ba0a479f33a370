// 该文件是 Jiankao （监考） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use url::Url;

/// Jiankao 监考取证参数配置
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入帧来源：图片文件或图片目录（目录内图片按文件名顺序循环播放）
  #[arg(long, value_name = "SOURCE")]
  pub input: PathBuf,

  /// 检测结果来源，例如 replay:///path/to/cycles.jsonl?loop
  #[arg(long, value_name = "DETECTIONS")]
  pub detections: Url,

  /// 证据目录，例如 folder:///path/to/evidence
  #[arg(long, value_name = "EVIDENCE")]
  pub evidence: Url,

  /// 需要截取证据的类别
  #[arg(long, value_name = "CLASS")]
  pub capture_class: Option<String>,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value = "0.5", value_name = "THRESHOLD")]
  pub confidence: f32,

  /// 水印字体文件（TTF/OTF），未指定时使用内置字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 流水线配置文件（TOML）
  #[arg(long, value_name = "CONFIG")]
  pub config: Option<PathBuf>,

  /// 处理的检测周期数，0 表示直到 Ctrl-C
  #[arg(long, default_value = "0", value_name = "COUNT")]
  pub cycles: usize,

  /// 结束时清空证据目录
  #[arg(long)]
  pub purge: bool,
}
