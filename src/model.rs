// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model.rs - 模型
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

use serde::Serialize;

pub trait Model {
  type Input;
  type Output;
  type Error;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error>;
}

/// 像素坐标下的边界框，(x, y) 为左上角
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl BBox {
  pub fn area(&self) -> i64 {
    self.width as i64 * self.height as i64
  }
}

/// 最终输出的一个检测结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
  pub class: String,
  /// 保留两位小数
  pub confidence: f64,
  pub bbox: BBox,
}

#[derive(Debug, Clone, Default)]
pub struct DetectResult {
  pub items: Box<[Detection]>,
}

impl DetectResult {
  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl From<Vec<Detection>> for DetectResult {
  fn from(items: Vec<Detection>) -> Self {
    Self {
      items: items.into_boxed_slice(),
    }
  }
}

mod detector;
mod loader;
pub mod postprocess;

pub use self::detector::{DetectError, Detector, DetectorConfig, blob_from_frame, detect, detect_with_config};
pub use self::loader::{
  CONFIG_FILE, LABELS_FILE, ModelBundle, ModelLoadError, WEIGHTS_FILE, parse_labels,
  resolve_output_layers,
};
