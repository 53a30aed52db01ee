// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/darknet/weights.rs - Darknet 权重文件读取
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

use thiserror::Error;
use tracing::{debug, warn};

const HEADER_VERSION_BYTES: usize = 12;
// 版本号不小于该值时视为损坏的文件头，按旧格式读取
const VERSION_LIMIT: i32 = 1000;

#[derive(Error, Debug)]
pub enum WeightsError {
  #[error("header truncated: {0} bytes")]
  TruncatedHeader(usize),
  #[error("file ends before {what}: need {needed} values, {remaining} left")]
  Truncated {
    what: String,
    needed: usize,
    remaining: usize,
  },
}

/// 权重文件头
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightsHeader {
  pub major: i32,
  pub minor: i32,
  pub revision: i32,
  /// 训练时见过的图像数量
  pub seen: u64,
}

impl WeightsHeader {
  /// 0.2 之后的版本用 64 位记录 seen
  fn wide_seen(major: i32, minor: i32) -> bool {
    major as i64 * 10 + minor as i64 >= 2 && major < VERSION_LIMIT && minor < VERSION_LIMIT
  }
}

/// 顺序读取权重值，每层按需取走自己的部分
#[derive(Debug)]
pub struct WeightsReader {
  header: WeightsHeader,
  values: Vec<f32>,
  cursor: usize,
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
  i32::from_le_bytes([
    bytes[offset],
    bytes[offset + 1],
    bytes[offset + 2],
    bytes[offset + 3],
  ])
}

impl WeightsReader {
  pub fn from_bytes(bytes: &[u8]) -> Result<Self, WeightsError> {
    if bytes.len() < HEADER_VERSION_BYTES {
      return Err(WeightsError::TruncatedHeader(bytes.len()));
    }
    let major = read_i32(bytes, 0);
    let minor = read_i32(bytes, 4);
    let revision = read_i32(bytes, 8);

    let (seen, body_offset) = if WeightsHeader::wide_seen(major, minor) {
      let end = HEADER_VERSION_BYTES + 8;
      let seen_bytes: [u8; 8] = bytes
        .get(HEADER_VERSION_BYTES..end)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(WeightsError::TruncatedHeader(bytes.len()))?;
      (u64::from_le_bytes(seen_bytes), end)
    } else {
      let end = HEADER_VERSION_BYTES + 4;
      let seen_bytes: [u8; 4] = bytes
        .get(HEADER_VERSION_BYTES..end)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(WeightsError::TruncatedHeader(bytes.len()))?;
      (u32::from_le_bytes(seen_bytes) as u64, end)
    };

    let body = &bytes[body_offset..];
    let chunks = body.chunks_exact(4);
    if !chunks.remainder().is_empty() {
      warn!("权重文件末尾有 {} 个多余字节", chunks.remainder().len());
    }
    let values: Vec<f32> = chunks
      .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
      .collect();

    let header = WeightsHeader {
      major,
      minor,
      revision,
      seen,
    };
    debug!(
      "权重文件版本 {}.{}.{}, seen = {}, 共 {} 个参数",
      major,
      minor,
      revision,
      seen,
      values.len()
    );

    Ok(Self {
      header,
      values,
      cursor: 0,
    })
  }

  pub fn header(&self) -> WeightsHeader {
    self.header
  }

  pub fn remaining(&self) -> usize {
    self.values.len() - self.cursor
  }

  /// 取走接下来的 `count` 个值
  pub fn take(&mut self, count: usize, what: &str) -> Result<&[f32], WeightsError> {
    let remaining = self.remaining();
    if count > remaining {
      return Err(WeightsError::Truncated {
        what: what.to_string(),
        needed: count,
        remaining,
      });
    }
    let start = self.cursor;
    self.cursor += count;
    Ok(&self.values[start..self.cursor])
  }
}
