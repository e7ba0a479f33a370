// 该文件是 Jiankao （监考） 项目的一部分。
// src/source.rs - 检测结果来源
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

use std::io::BufRead;

use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::detection::{Detection, parse_batch};
use crate::frame::Frame;
use crate::{FromUrl, FromUrlWithScheme};

/// 推理服务：对一帧给出检测列表。失败的重试与退避由调用方负责。
pub trait DetectionSource {
  type Error: std::error::Error + Send + Sync + 'static;

  fn infer(&mut self, frame: &Frame, confidence_threshold: f32)
  -> Result<Vec<Detection>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum ReplaySourceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

/// 回放录制的推理结果：每行一个 JSON 数组，对应一个检测周期
#[derive(Debug, Default)]
pub struct ReplaySource {
  batches: Vec<Vec<Detection>>,
  cursor: usize,
  looping: bool,
}

impl FromUrlWithScheme for ReplaySource {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplaySource {
  type Error = ReplaySourceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ReplaySourceError::SchemeMismatch);
    }

    let looping = url.query_pairs().any(|(k, _)| k == "loop");
    let file = std::fs::File::open(url.path())?;
    let source = Self::from_reader(std::io::BufReader::new(file))?.looping(looping);
    info!(
      "加载回放检测结果: {} ({} 个周期)",
      url.path(),
      source.batches.len()
    );
    Ok(source)
  }
}

impl ReplaySource {
  pub fn new(batches: Vec<Vec<Detection>>) -> Self {
    Self {
      batches,
      cursor: 0,
      looping: false,
    }
  }

  pub fn from_reader(reader: impl BufRead) -> Result<Self, ReplaySourceError> {
    let mut batches = Vec::new();
    for (line_no, line) in reader.lines().enumerate() {
      let line = line?;
      if line.trim().is_empty() {
        continue;
      }
      let batch = serde_json::from_str::<serde_json::Value>(&line)
        .map_err(|e| e.to_string())
        .and_then(|value| parse_batch(&value).map_err(|e| e.to_string()));
      match batch {
        Ok(batch) => batches.push(batch),
        Err(e) => {
          warn!("第 {} 行不是有效的检测批次: {}", line_no + 1, e);
          batches.push(Vec::new());
        }
      }
    }
    Ok(Self::new(batches))
  }

  pub fn looping(mut self, looping: bool) -> Self {
    self.looping = looping;
    self
  }

  pub fn remaining(&self) -> usize {
    self.batches.len().saturating_sub(self.cursor)
  }
}

impl DetectionSource for ReplaySource {
  type Error = ReplaySourceError;

  fn infer(
    &mut self,
    _frame: &Frame,
    confidence_threshold: f32,
  ) -> Result<Vec<Detection>, Self::Error> {
    if self.cursor >= self.batches.len() {
      if !self.looping || self.batches.is_empty() {
        return Ok(Vec::new());
      }
      self.cursor = 0;
    }

    let batch = self.batches[self.cursor]
      .iter()
      .filter(|d| d.confidence >= confidence_threshold)
      .cloned()
      .collect();
    self.cursor += 1;
    Ok(batch)
  }
}
