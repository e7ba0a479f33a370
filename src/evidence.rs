// 该文件是 Jiankao （监考） 项目的一部分。
// src/evidence.rs - 证据图像目录
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

use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use image::{ImageFormat, RgbImage};
use rand::Rng;
use rand::distributions::Alphanumeric;
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

/// 未标记证据文件名前缀
pub const UNTAGGED_PREFIX: &str = "untagged-";

const EVIDENCE_EXTENSION: &str = "png";
const PARTIAL_EXTENSION: &str = "part";
const ID_LENGTH: usize = 8;
const MAX_NAME_ATTEMPTS: usize = 64;
const MAX_TAG_SUFFIX: u32 = 10_000;
const ILLEGAL_TAG_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];

#[derive(Error, Debug)]
pub enum EvidenceError {
  #[error("URI 方案不匹配")]
  SchemeMismatch,
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("非法标签: {0:?}")]
  InvalidTag(String),
  #[error("文件不受证据目录管理: {0}")]
  NotManaged(PathBuf),
  #[error("证据文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("尝试 {0} 次后仍无法生成不重复的文件名")]
  NameExhausted(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvidenceGroup {
  Untagged,
  Tagged,
  All,
}

/// 证据目录变更通知，供图库界面与报告生成器订阅
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvidenceEvent {
  Created(PathBuf),
  Renamed { from: PathBuf, to: PathBuf },
  Deleted(PathBuf),
  Purged(usize),
}

pub struct EvidenceStore {
  root: PathBuf,
  issued: Mutex<HashSet<PathBuf>>,
  subscribers: Mutex<Vec<Sender<EvidenceEvent>>>,
}

impl FromUrlWithScheme for EvidenceStore {
  const SCHEME: &'static str = "folder";
}

impl FromUrl for EvidenceStore {
  type Error = EvidenceError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(EvidenceError::SchemeMismatch);
    }
    Self::new(url.path())
  }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn random_id() -> String {
  rand::thread_rng()
    .sample_iter(&Alphanumeric)
    .take(ID_LENGTH)
    .map(|c| char::from(c).to_ascii_lowercase())
    .collect()
}

fn file_name(path: &Path) -> &str {
  path.file_name().and_then(|n| n.to_str()).unwrap_or_default()
}

fn validate_tag(tag: &str) -> Result<&str, EvidenceError> {
  let tag = tag.trim();
  let invalid = tag.is_empty()
    || tag == "."
    || tag == ".."
    || tag.starts_with('.')
    || tag.ends_with('.')
    || tag.starts_with(UNTAGGED_PREFIX)
    || tag
      .chars()
      .any(|c| c.is_control() || ILLEGAL_TAG_CHARS.contains(&c));
  if invalid {
    return Err(EvidenceError::InvalidTag(tag.to_string()));
  }
  Ok(tag)
}

impl EvidenceStore {
  pub fn new(root: impl Into<PathBuf>) -> Result<Self, EvidenceError> {
    let root = root.into();
    std::fs::create_dir_all(&root)?;
    info!("证据目录: {}", root.display());
    Ok(Self {
      root,
      issued: Mutex::new(HashSet::new()),
      subscribers: Mutex::new(Vec::new()),
    })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn subscribe(&self) -> Receiver<EvidenceEvent> {
    let (tx, rx) = channel();
    lock(&self.subscribers).push(tx);
    rx
  }

  fn emit(&self, event: EvidenceEvent) {
    lock(&self.subscribers).retain(|tx| tx.send(event.clone()).is_ok());
  }

  /// 目录下由本模块管理的证据文件：同级、png 扩展名、非隐藏
  pub fn is_managed(&self, path: &Path) -> bool {
    path.parent() == Some(self.root.as_path())
      && path.extension().and_then(|e| e.to_str()) == Some(EVIDENCE_EXTENSION)
      && !file_name(path).is_empty()
      && !file_name(path).starts_with('.')
  }

  fn is_untagged(path: &Path) -> bool {
    file_name(path).starts_with(UNTAGGED_PREFIX)
  }

  /// 生成一个未被占用的随机文件路径，有限次重试
  pub fn generate_unique_name(&self, prefix: &str) -> Result<PathBuf, EvidenceError> {
    let mut issued = lock(&self.issued);
    for _ in 0..MAX_NAME_ATTEMPTS {
      let path = self
        .root
        .join(format!("{}{}.{}", prefix, random_id(), EVIDENCE_EXTENSION));
      if !path.exists() && issued.insert(path.clone()) {
        return Ok(path);
      }
    }
    Err(EvidenceError::NameExhausted(MAX_NAME_ATTEMPTS))
  }

  /// 以未标记状态保存证据图像。先写入隐藏的临时文件再改名，失败时不留下文件。
  pub fn create_untagged(&self, image: &RgbImage) -> Result<PathBuf, EvidenceError> {
    let path = self.generate_unique_name(UNTAGGED_PREFIX)?;
    let partial = self
      .root
      .join(format!(".{}.{}", file_name(&path), PARTIAL_EXTENSION));

    let written = image
      .save_with_format(&partial, ImageFormat::Png)
      .map_err(EvidenceError::from)
      .and_then(|_| std::fs::rename(&partial, &path).map_err(EvidenceError::from));

    if let Err(e) = written {
      if partial.exists()
        && let Err(cleanup) = std::fs::remove_file(&partial)
      {
        warn!("无法清理临时文件 {}: {}", partial.display(), cleanup);
      }
      lock(&self.issued).remove(&path);
      return Err(e);
    }

    info!("保存证据图像: {}", path.display());
    self.emit(EvidenceEvent::Created(path.clone()));
    Ok(path)
  }

  /// 以人工标签重命名证据文件，重名时追加数字后缀
  pub fn rename_with_tag(&self, path: &Path, tag: &str) -> Result<PathBuf, EvidenceError> {
    let tag = validate_tag(tag)?;
    if !self.is_managed(path) {
      return Err(EvidenceError::NotManaged(path.to_path_buf()));
    }
    if !path.exists() {
      return Err(EvidenceError::NotFound(path.to_path_buf()));
    }

    // 硬链接在目标已存在时失败，以此原子地占用新文件名，避免并发标记互相覆盖
    for counter in 0..MAX_TAG_SUFFIX {
      let name = if counter == 0 {
        format!("{}.{}", tag, EVIDENCE_EXTENSION)
      } else {
        format!("{}_{}.{}", tag, counter, EVIDENCE_EXTENSION)
      };
      let candidate = self.root.join(name);
      if candidate == path {
        return Ok(candidate);
      }
      if lock(&self.issued).contains(&candidate) {
        continue;
      }

      match std::fs::hard_link(path, &candidate) {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
        Err(e) if e.kind() == ErrorKind::NotFound => {
          return Err(EvidenceError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
      }
      if let Err(e) = std::fs::remove_file(path) {
        // 原文件已被其他调用方移走，撤销本次链接
        if let Err(cleanup) = std::fs::remove_file(&candidate) {
          warn!("无法撤销标记 {}: {}", candidate.display(), cleanup);
        }
        return Err(match e.kind() {
          ErrorKind::NotFound => EvidenceError::NotFound(path.to_path_buf()),
          _ => e.into(),
        });
      }

      lock(&self.issued).remove(path);
      info!("证据 {} 标记为 {}", path.display(), candidate.display());
      self.emit(EvidenceEvent::Renamed {
        from: path.to_path_buf(),
        to: candidate.clone(),
      });
      return Ok(candidate);
    }
    Err(EvidenceError::NameExhausted(MAX_TAG_SUFFIX as usize))
  }

  pub fn delete(&self, path: &Path) -> Result<(), EvidenceError> {
    if !self.is_managed(path) {
      return Err(EvidenceError::NotManaged(path.to_path_buf()));
    }
    std::fs::remove_file(path)?;
    lock(&self.issued).remove(path);
    info!("删除证据: {}", path.display());
    self.emit(EvidenceEvent::Deleted(path.to_path_buf()));
    Ok(())
  }

  /// 未标记的按修改时间从新到旧，已标记的按文件名字母序；`All` 先未标记后已标记
  pub fn list(&self, group: EvidenceGroup) -> Result<Vec<PathBuf>, EvidenceError> {
    let mut untagged: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut tagged: Vec<PathBuf> = Vec::new();

    for entry in std::fs::read_dir(&self.root)? {
      let path = entry?.path();
      if !path.is_file() || !self.is_managed(&path) {
        continue;
      }
      if Self::is_untagged(&path) {
        if group != EvidenceGroup::Tagged {
          // 与删除并发时文件可能已不存在
          let modified = match path.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) if e.kind() == ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
          };
          untagged.push((modified, path));
        }
      } else if group != EvidenceGroup::Untagged {
        tagged.push(path);
      }
    }

    untagged.sort_by(|(ta, pa), (tb, pb)| tb.cmp(ta).then_with(|| pa.cmp(pb)));
    tagged.sort_by(|a, b| file_name(a).cmp(file_name(b)));

    let mut listed: Vec<PathBuf> = untagged.into_iter().map(|(_, p)| p).collect();
    listed.extend(tagged);
    Ok(listed)
  }

  /// 报告生成完毕后清空全部证据，包括残留的临时文件
  pub fn purge_all(&self) -> Result<usize, EvidenceError> {
    let mut removed = 0;
    for entry in std::fs::read_dir(&self.root)? {
      let path = entry?.path();
      if !path.is_file() {
        continue;
      }
      let partial = file_name(&path).starts_with('.')
        && path.extension().and_then(|e| e.to_str()) == Some(PARTIAL_EXTENSION);
      if self.is_managed(&path) || partial {
        match std::fs::remove_file(&path) {
          Ok(()) => removed += 1,
          Err(e) if e.kind() == ErrorKind::NotFound => {}
          Err(e) => return Err(e.into()),
        }
      }
    }
    lock(&self.issued).clear();
    info!("清空证据目录，共删除 {} 个文件", removed);
    self.emit(EvidenceEvent::Purged(removed));
    Ok(removed)
  }
}
