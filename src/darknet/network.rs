// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/darknet/network.rs - Darknet 网络图与前向推理
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

use std::path::Path;

use ndarray::{Array2, Array3};
use tracing::{debug, info, warn};

use crate::darknet::{
  DarknetError,
  cfg::{Section, parse_cfg},
  layer::{BuildError, Convolutional, LayerError, MaxPool, Route, Shortcut, Upsample, Yolo},
  weights::WeightsReader,
};

#[derive(Debug, Clone)]
enum Layer {
  Convolutional(Convolutional),
  MaxPool(MaxPool),
  Upsample(Upsample),
  Route(Route),
  Shortcut(Shortcut),
  Yolo(Yolo),
}

impl Layer {
  fn prefix(&self) -> &'static str {
    match self {
      Layer::Convolutional(_) => "conv",
      Layer::MaxPool(_) => "pool",
      Layer::Upsample(_) => "upsample",
      Layer::Route(_) => "route",
      Layer::Shortcut(_) => "shortcut",
      Layer::Yolo(_) => "yolo",
    }
  }
}

/// 层的输入来源：`None` 表示网络输入
type Source = Option<usize>;

#[derive(Debug, Clone)]
struct Node {
  name: String,
  layer: Layer,
  inputs: Vec<Source>,
}

/// 层输出：卷积类层为 (C, H, W) 张量，YOLO 层为检测行矩阵
#[derive(Debug, Clone)]
enum Blob {
  Spatial(Array3<f32>),
  Rows(Array2<f32>),
}

impl Blob {
  fn spatial(&self) -> Result<&Array3<f32>, LayerError> {
    match self {
      Blob::Spatial(tensor) => Ok(tensor),
      Blob::Rows(_) => Err(LayerError::NotSpatial),
    }
  }

  fn into_rows(self) -> Result<Array2<f32>, LayerError> {
    match self {
      Blob::Rows(rows) => Ok(rows),
      Blob::Spatial(tensor) => {
        let (channels, height, width) = tensor.dim();
        Ok(tensor.into_shape_with_order((channels, height * width))?)
      }
    }
  }
}

/// 已加载权重的 Darknet 网络，构建后只读
#[derive(Debug, Clone)]
pub struct Network {
  input_channels: usize,
  nodes: Vec<Node>,
}

fn topology(index: usize, section: &Section, reason: impl Into<String>) -> DarknetError {
  DarknetError::Topology {
    index,
    section: section.name().to_string(),
    reason: reason.into(),
  }
}

/// 将 cfg 中的层索引（负数为相对索引）解析为绝对索引
fn resolve_index(index: usize, section: &Section, relative: i64) -> Result<usize, DarknetError> {
  let absolute = if relative < 0 {
    index as i64 + relative
  } else {
    relative
  };
  if absolute < 0 || absolute >= index as i64 {
    return Err(topology(
      index,
      section,
      format!("layer reference {relative} is out of range"),
    ));
  }
  Ok(absolute as usize)
}

impl Network {
  /// 从文件加载网络结构与权重
  pub fn from_files(cfg_path: &Path, weights_path: &Path) -> Result<Self, DarknetError> {
    info!("读取网络结构: {}", cfg_path.display());
    let cfg = std::fs::read_to_string(cfg_path).map_err(|source| DarknetError::Io {
      path: cfg_path.to_path_buf(),
      source,
    })?;
    info!("读取网络权重: {}", weights_path.display());
    let weights = std::fs::read(weights_path).map_err(|source| DarknetError::Io {
      path: weights_path.to_path_buf(),
      source,
    })?;
    debug!(
      "权重文件大小: {:.2} MB",
      weights.len() as f64 / (1024.0 * 1024.0)
    );
    Self::from_darknet(&cfg, &weights)
  }

  /// 由 cfg 文本与权重字节构建网络
  pub fn from_darknet(cfg: &str, weights: &[u8]) -> Result<Self, DarknetError> {
    let sections = parse_cfg(cfg)?;
    let mut reader = WeightsReader::from_bytes(weights)?;

    let net = &sections[0];
    let input_channels: usize = net.get_or("channels", 3)?;
    debug!(
      "网络输入: {}x{}x{}",
      net.get_or("width", 0usize)?,
      net.get_or("height", 0usize)?,
      input_channels
    );

    let mut nodes: Vec<Node> = Vec::with_capacity(sections.len() - 1);
    // 每层输出的通道数
    let mut channels: Vec<usize> = Vec::with_capacity(sections.len() - 1);

    for (index, section) in sections[1..].iter().enumerate() {
      let previous: Source = index.checked_sub(1);
      let previous_channels = previous.map_or(input_channels, |p| channels[p]);

      let (layer, inputs, out_channels) = match section.name() {
        "convolutional" => {
          let name = format!("conv_{index}");
          let conv = Convolutional::from_section(section, previous_channels, &name, &mut reader)
            .map_err(|e| match e {
              BuildError::Cfg(e) => DarknetError::Cfg(e),
              BuildError::Weights(e) => DarknetError::Weights(e),
              BuildError::Shape(e) => topology(index, section, e.to_string()),
            })?;
          let filters = conv.filters();
          (Layer::Convolutional(conv), vec![previous], filters)
        }
        "maxpool" => (
          Layer::MaxPool(MaxPool::from_section(section)?),
          vec![previous],
          previous_channels,
        ),
        "upsample" => (
          Layer::Upsample(Upsample::from_section(section)?),
          vec![previous],
          previous_channels,
        ),
        "route" => {
          let route = Route::from_section(section)?;
          let refs: Vec<i64> = section.list("layers")?.unwrap_or_default();
          if refs.is_empty() {
            return Err(topology(index, section, "route without layers"));
          }
          let sources = refs
            .into_iter()
            .map(|r| resolve_index(index, section, r))
            .collect::<Result<Vec<_>, _>>()?;
          let source_channels: Vec<usize> = sources.iter().map(|&s| channels[s]).collect();
          let out_channels = route.out_channels(&source_channels);
          (
            Layer::Route(route),
            sources.into_iter().map(Some).collect(),
            out_channels,
          )
        }
        "shortcut" => {
          let from = resolve_index(index, section, section.require("from")?)?;
          if previous.is_none() {
            return Err(topology(index, section, "shortcut cannot be the first layer"));
          }
          (
            Layer::Shortcut(Shortcut::from_section(section)?),
            vec![previous, Some(from)],
            previous_channels,
          )
        }
        "yolo" => {
          let yolo = Yolo::from_section(section)?;
          let width = yolo.row_width();
          (Layer::Yolo(yolo), vec![previous], width)
        }
        other => return Err(DarknetError::Unsupported(other.to_string())),
      };

      let node = Node {
        name: format!("{}_{}", layer.prefix(), index),
        layer,
        inputs,
      };
      debug!("构建层 {} -> {} 通道", node.name, out_channels);
      nodes.push(node);
      channels.push(out_channels);
    }

    if nodes.is_empty() {
      return Err(DarknetError::Unsupported("network without layers".to_string()));
    }
    if reader.remaining() > 0 {
      warn!("权重文件还剩 {} 个未使用的参数", reader.remaining());
    }
    info!("网络构建完成, 共 {} 层", nodes.len());

    Ok(Self {
      input_channels,
      nodes,
    })
  }

  /// 所有层名，按网络顺序排列
  pub fn layer_names(&self) -> Vec<String> {
    self.nodes.iter().map(|node| node.name.clone()).collect()
  }

  /// 输出未被其他层使用的层，索引从 1 开始
  pub fn unconnected_out_layers(&self) -> Vec<usize> {
    let mut consumed = vec![false; self.nodes.len()];
    for node in &self.nodes {
      for source in node.inputs.iter().flatten() {
        consumed[*source] = true;
      }
    }
    consumed
      .iter()
      .enumerate()
      .filter(|(_, used)| !**used)
      .map(|(index, _)| index + 1)
      .collect()
  }

  /// 前向推理，只计算到请求的输出层为止
  ///
  /// `input` 为 (C, H, W) 张量；返回值与 `outputs` 一一对应，
  /// 每个输出为二维矩阵（YOLO 层每行一个候选框）。
  pub fn forward(
    &self,
    input: &Array3<f32>,
    outputs: &[String],
  ) -> Result<Vec<Array2<f32>>, DarknetError> {
    let (channels, net_height, net_width) = input.dim();
    if channels != self.input_channels {
      return Err(DarknetError::Forward {
        layer: "input".to_string(),
        source: LayerError::ChannelMismatch {
          expected: self.input_channels,
          actual: channels,
        },
      });
    }

    let requested = outputs
      .iter()
      .map(|name| {
        self
          .nodes
          .iter()
          .position(|node| &node.name == name)
          .ok_or_else(|| DarknetError::UnknownLayer(name.clone()))
      })
      .collect::<Result<Vec<usize>, _>>()?;
    let Some(&last) = requested.iter().max() else {
      return Ok(Vec::new());
    };

    // 每层输出最后一次被使用的位置，用完即释放
    let mut last_use: Vec<Option<usize>> = vec![None; self.nodes.len()];
    for (index, node) in self.nodes.iter().enumerate().take(last + 1) {
      for source in node.inputs.iter().flatten() {
        last_use[*source] = Some(index);
      }
    }
    let mut keep = vec![false; self.nodes.len()];
    for &index in &requested {
      keep[index] = true;
    }

    let mut blobs: Vec<Option<Blob>> = (0..=last).map(|_| None).collect();
    for (index, node) in self.nodes.iter().enumerate().take(last + 1) {
      let blob = self
        .run_node(node, input, &blobs, net_width, net_height)
        .map_err(|source| DarknetError::Forward {
          layer: node.name.clone(),
          source,
        })?;
      blobs[index] = Some(blob);

      for source in node.inputs.iter().flatten() {
        if last_use[*source] == Some(index) && !keep[*source] {
          blobs[*source] = None;
        }
      }
    }

    let mut results = Vec::with_capacity(requested.len());
    for (position, &index) in requested.iter().enumerate() {
      // 同一层被重复请求时，只有最后一次取走
      let blob = if requested[position + 1..].contains(&index) {
        blobs[index].clone()
      } else {
        blobs[index].take()
      };
      let blob = blob.ok_or_else(|| DarknetError::UnknownLayer(self.nodes[index].name.clone()))?;
      results.push(blob.into_rows().map_err(|source| DarknetError::Forward {
        layer: self.nodes[index].name.clone(),
        source,
      })?);
    }
    Ok(results)
  }

  fn run_node(
    &self,
    node: &Node,
    input: &Array3<f32>,
    blobs: &[Option<Blob>],
    net_width: usize,
    net_height: usize,
  ) -> Result<Blob, LayerError> {
    let first = fetch(input, blobs, node.inputs[0])?;

    let blob = match &node.layer {
      Layer::Convolutional(conv) => Blob::Spatial(conv.forward(first)?),
      Layer::MaxPool(pool) => Blob::Spatial(pool.forward(first)?),
      Layer::Upsample(up) => Blob::Spatial(up.forward(first)),
      Layer::Route(route) => {
        let inputs = node
          .inputs
          .iter()
          .map(|&source| fetch(input, blobs, source))
          .collect::<Result<Vec<_>, _>>()?;
        Blob::Spatial(route.forward(&inputs)?)
      }
      Layer::Shortcut(shortcut) => {
        let from = fetch(input, blobs, node.inputs[1])?;
        Blob::Spatial(shortcut.forward(first, from)?)
      }
      Layer::Yolo(yolo) => Blob::Rows(yolo.forward(first, net_width, net_height)?),
    };
    Ok(blob)
  }
}

fn fetch<'a>(
  input: &'a Array3<f32>,
  blobs: &'a [Option<Blob>],
  source: Source,
) -> Result<&'a Array3<f32>, LayerError> {
  match source {
    None => Ok(input),
    Some(index) => blobs[index]
      .as_ref()
      .ok_or(LayerError::NotSpatial)?
      .spatial(),
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  // conv_0 -> conv_1 -> yolo_2, route_3(-3) -> conv_4 -> yolo_5
  const CFG: &str = "\
[net]
width=8
height=8
channels=3

[convolutional]
filters=4
size=3
stride=2
pad=1
activation=leaky

[convolutional]
filters=7
size=1
activation=linear

[yolo]
mask=0
anchors=2,2
classes=2
num=1

[route]
layers=-3

[convolutional]
filters=7
size=1
activation=linear

[yolo]
mask=0
anchors=4,4
classes=2
num=1
";

  fn weights(count: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    for header in [0i32, 2, 0] {
      bytes.extend_from_slice(&header.to_le_bytes());
    }
    bytes.extend_from_slice(&0u64.to_le_bytes());
    for i in 0..count {
      bytes.extend_from_slice(&((i % 7) as f32 * 0.01).to_le_bytes());
    }
    bytes
  }

  // conv_0: 4 + 4*3*9, conv_1: 7 + 7*4, conv_4: 7 + 7*4
  const WEIGHT_COUNT: usize = 4 + 108 + 7 + 28 + 7 + 28;

  #[test]
  fn names_and_unconnected_outputs() {
    let network = Network::from_darknet(CFG, &weights(WEIGHT_COUNT)).unwrap();
    assert_eq!(
      network.layer_names(),
      ["conv_0", "conv_1", "yolo_2", "route_3", "conv_4", "yolo_5"]
    );
    assert_eq!(network.unconnected_out_layers(), [3, 6]);
  }

  #[test]
  fn forward_returns_requested_outputs() {
    let network = Network::from_darknet(CFG, &weights(WEIGHT_COUNT)).unwrap();
    let input = Array3::<f32>::from_elem((3, 8, 8), 0.5);
    let outputs = network
      .forward(&input, &["yolo_5".to_string(), "yolo_2".to_string()])
      .unwrap();
    assert_eq!(outputs.len(), 2);
    // 4x4 网格, 1 个锚框, 2 类
    assert_eq!(outputs[0].dim(), (16, 7));
    assert_eq!(outputs[1].dim(), (16, 7));
    assert!(outputs[0].iter().all(|v| v.is_finite()));
  }

  #[test]
  fn forward_can_expose_spatial_layers() {
    let network = Network::from_darknet(CFG, &weights(WEIGHT_COUNT)).unwrap();
    let input = Array3::<f32>::zeros((3, 8, 8));
    let outputs = network.forward(&input, &["conv_0".to_string()]).unwrap();
    assert_eq!(outputs[0].dim(), (4, 16));
  }

  #[test]
  fn forward_rejects_unknown_layers_and_bad_input() {
    let network = Network::from_darknet(CFG, &weights(WEIGHT_COUNT)).unwrap();
    let input = Array3::<f32>::zeros((3, 8, 8));
    assert!(matches!(
      network.forward(&input, &["yolo_9".to_string()]),
      Err(DarknetError::UnknownLayer(_))
    ));
    let gray = Array3::<f32>::zeros((1, 8, 8));
    assert!(matches!(
      network.forward(&gray, &["yolo_2".to_string()]),
      Err(DarknetError::Forward { .. })
    ));
  }

  #[test]
  fn short_weights_fail_to_load() {
    assert!(matches!(
      Network::from_darknet(CFG, &weights(WEIGHT_COUNT - 1)),
      Err(DarknetError::Weights(_))
    ));
  }

  #[test]
  fn bad_topology_fails_to_load() {
    let cfg = "[net]\n[route]\nlayers=-1\n";
    assert!(matches!(
      Network::from_darknet(cfg, &weights(0)),
      Err(DarknetError::Topology { index: 0, .. })
    ));
    let cfg = "[net]\n[region]\n";
    assert!(matches!(
      Network::from_darknet(cfg, &weights(0)),
      Err(DarknetError::Unsupported(_))
    ));
  }
}
