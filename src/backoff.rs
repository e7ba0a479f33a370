// 该文件是 Jiankao （监考） 项目的一部分。
// src/backoff.rs - 推理失败指数退避
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

use std::time::Duration;

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

/// 指数退避状态：每次失败延迟翻倍直至上限，成功后复位
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
  initial: Duration,
  max: Duration,
  current: Option<Duration>,
  failures: u32,
}

impl Default for Backoff {
  fn default() -> Self {
    Self::new(DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF)
  }
}

impl Backoff {
  pub fn new(initial: Duration, max: Duration) -> Self {
    Self {
      initial,
      max: max.max(initial),
      current: None,
      failures: 0,
    }
  }

  /// 记录一次失败，返回下一次重试前应等待的时长
  pub fn on_failure(&mut self) -> Duration {
    let next = match self.current {
      None => self.initial,
      Some(delay) => delay.saturating_mul(2).min(self.max),
    };
    self.current = Some(next);
    self.failures = self.failures.saturating_add(1);
    next
  }

  pub fn on_success(&mut self) {
    self.current = None;
    self.failures = 0;
  }

  /// 当前退避时长，未处于失败状态时为 `None`
  pub fn current(&self) -> Option<Duration> {
    self.current
  }

  pub fn failures(&self) -> u32 {
    self.failures
  }
}
