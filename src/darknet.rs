// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/darknet.rs - Darknet 模型运行时
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

//! 直接读取 Darknet `.cfg` 与 `.weights` 的 CPU 推理运行时。
//!
//! 支持 YOLOv3 / YOLOv3-tiny 所需的层：`convolutional`、`maxpool`、
//! `upsample`、`route`、`shortcut` 与 `yolo`。

use std::path::PathBuf;

use thiserror::Error;

pub mod cfg;
pub mod layer;
pub mod weights;

mod network;
pub use self::network::Network;

use self::{cfg::CfgError, layer::LayerError, weights::WeightsError};

#[derive(Error, Debug)]
pub enum DarknetError {
  #[error("cannot read {}: {source}", .path.display())]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("invalid network config: {0}")]
  Cfg(#[from] CfgError),
  #[error("invalid weights: {0}")]
  Weights(#[from] WeightsError),
  #[error("layer {index} [{section}]: {reason}")]
  Topology {
    index: usize,
    section: String,
    reason: String,
  },
  #[error("unsupported layer type [{0}]")]
  Unsupported(String),
  #[error("unknown output layer `{0}`")]
  UnknownLayer(String),
  #[error("layer `{layer}` failed: {source}")]
  Forward { layer: String, source: LayerError },
}
