// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model/loader.rs - 模型加载
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

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, error, info};

use crate::darknet::{DarknetError, Network};

pub const WEIGHTS_FILE: &str = "yolov3.weights";
pub const CONFIG_FILE: &str = "yolov3.cfg";
pub const LABELS_FILE: &str = "coco.names";

#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("model file not found: {}", .0.display())]
  MissingFile(PathBuf),
  #[error("cannot read {}: {source}", .path.display())]
  IoError {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("invalid network: {0}")]
  NetworkError(#[from] DarknetError),
  #[error("network has no output layers")]
  NoOutputLayers,
  #[error("output layer index {0} is out of range")]
  OutputIndexOutOfRange(usize),
}

/// 加载完成的模型：网络、类别表与输出层名
#[derive(Debug, Clone)]
pub struct ModelBundle {
  pub network: Network,
  pub labels: Vec<String>,
  pub output_layers: Vec<String>,
}

fn existing(path: PathBuf) -> Result<PathBuf, ModelLoadError> {
  if path.is_file() {
    Ok(path)
  } else {
    Err(ModelLoadError::MissingFile(path))
  }
}

/// 每行一个类别名；去掉首尾空白，空行保留以维持索引
pub fn parse_labels(text: &str) -> Vec<String> {
  text.lines().map(|line| line.trim().to_string()).collect()
}

/// 将从 1 开始的输出层索引映射为层名
pub fn resolve_output_layers(
  names: &[String],
  indices: &[usize],
) -> Result<Vec<String>, ModelLoadError> {
  indices
    .iter()
    .map(|&index| {
      index
        .checked_sub(1)
        .and_then(|i| names.get(i))
        .cloned()
        .ok_or(ModelLoadError::OutputIndexOutOfRange(index))
    })
    .collect()
}

impl ModelBundle {
  /// 从 `base_dir` 下的固定文件名加载模型
  pub fn load(base_dir: impl AsRef<Path>) -> Result<Self, ModelLoadError> {
    Self::load_inner(base_dir.as_ref()).inspect_err(|e| {
      error!("模型加载失败: {}", e);
    })
  }

  fn load_inner(base_dir: &Path) -> Result<Self, ModelLoadError> {
    info!("模型目录: {}", base_dir.display());
    let weights_path = existing(base_dir.join(WEIGHTS_FILE))?;
    let config_path = existing(base_dir.join(CONFIG_FILE))?;
    let labels_path = existing(base_dir.join(LABELS_FILE))?;

    let network = Network::from_files(&config_path, &weights_path)?;

    let text = std::fs::read_to_string(&labels_path).map_err(|source| ModelLoadError::IoError {
      path: labels_path.clone(),
      source,
    })?;
    let labels = parse_labels(&text);
    info!("加载 {} 个类别", labels.len());

    let layer_names = network.layer_names();
    let output_layers =
      resolve_output_layers(&layer_names, &network.unconnected_out_layers())?;
    if output_layers.is_empty() {
      return Err(ModelLoadError::NoOutputLayers);
    }
    debug!("输出层: {:?}", output_layers);

    Ok(Self {
      network,
      labels,
      output_layers,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn labels_keep_order_and_blank_lines() {
    let labels = parse_labels("person\r\nbicycle \n\n  car\n");
    assert_eq!(labels, ["person", "bicycle", "", "car"]);
    assert!(parse_labels("").is_empty());
  }

  #[test]
  fn output_indices_are_one_based() {
    let names: Vec<String> = ["conv_0", "yolo_1", "route_2", "yolo_3"]
      .iter()
      .map(|s| s.to_string())
      .collect();
    assert_eq!(
      resolve_output_layers(&names, &[2, 4]).unwrap(),
      ["yolo_1", "yolo_3"]
    );
    assert!(matches!(
      resolve_output_layers(&names, &[0]),
      Err(ModelLoadError::OutputIndexOutOfRange(0))
    ));
    assert!(matches!(
      resolve_output_layers(&names, &[5]),
      Err(ModelLoadError::OutputIndexOutOfRange(5))
    ));
  }

  #[test]
  fn missing_directory_reports_weights_first() {
    let err = ModelBundle::load("/nonexistent/liaowang-model-dir").unwrap_err();
    match err {
      ModelLoadError::MissingFile(path) => assert!(path.ends_with(WEIGHTS_FILE)),
      other => panic!("unexpected error: {other}"),
    }
  }
}
