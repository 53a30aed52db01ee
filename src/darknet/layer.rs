// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/darknet/layer.rs - Darknet 网络层及其前向计算
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

use std::str::FromStr;

use ndarray::{Array1, Array2, Array3, ArrayView3, Axis, s};
use thiserror::Error;

use crate::darknet::{
  cfg::{CfgError, Section},
  weights::{WeightsError, WeightsReader},
};

// Darknet 归一化时加在标准差上的常数
const BATCH_NORM_EPSILON: f32 = 0.000001;
const LEAKY_SLOPE: f32 = 0.1;
// 卷积核、步长与填充的上限
const MAX_WINDOW: usize = 1 << 16;

#[derive(Error, Debug)]
pub enum LayerError {
  #[error("expected {expected} input channels, got {actual}")]
  ChannelMismatch { expected: usize, actual: usize },
  #[error("input {height}x{width} is smaller than kernel {size}")]
  InputTooSmall {
    height: usize,
    width: usize,
    size: usize,
  },
  #[error("inputs have mismatched shapes {0:?} and {1:?}")]
  ShapeMismatch((usize, usize, usize), (usize, usize, usize)),
  #[error("input is not a spatial tensor")]
  NotSpatial,
  #[error("tensor reshape failed: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activation {
  Linear,
  Leaky,
  Relu,
  Logistic,
  Mish,
  Swish,
}

impl FromStr for Activation {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s {
      "linear" => Ok(Activation::Linear),
      "leaky" => Ok(Activation::Leaky),
      "relu" => Ok(Activation::Relu),
      "logistic" => Ok(Activation::Logistic),
      "mish" => Ok(Activation::Mish),
      "swish" => Ok(Activation::Swish),
      other => Err(other.to_string()),
    }
  }
}

pub fn sigmoid(x: f32) -> f32 {
  1.0 / (1.0 + (-x).exp())
}

fn softplus(x: f32) -> f32 {
  if x > 20.0 { x } else { x.exp().ln_1p() }
}

impl Activation {
  pub fn apply(self, x: f32) -> f32 {
    match self {
      Activation::Linear => x,
      Activation::Leaky => {
        if x > 0.0 {
          x
        } else {
          LEAKY_SLOPE * x
        }
      }
      Activation::Relu => x.max(0.0),
      Activation::Logistic => sigmoid(x),
      Activation::Mish => x * softplus(x).tanh(),
      Activation::Swish => x * sigmoid(x),
    }
  }

  pub fn apply_inplace(self, tensor: &mut Array3<f32>) {
    if self != Activation::Linear {
      tensor.mapv_inplace(|x| self.apply(x));
    }
  }
}

fn activation_of(section: &Section) -> Result<Activation, CfgError> {
  section.get_or("activation", Activation::Linear)
}

fn unsupported(section: &Section, key: &str, value: &str) -> CfgError {
  CfgError::InvalidOption {
    section: section.name().to_string(),
    line: section.line(),
    key: key.to_string(),
    value: value.to_string(),
  }
}

fn window(section: &Section, key: &str, value: usize) -> Result<usize, CfgError> {
  if value > MAX_WINDOW {
    return Err(unsupported(section, key, &value.to_string()));
  }
  Ok(value)
}

/// 卷积层，批归一化参数在加载时已折叠进权重与偏置
#[derive(Debug, Clone)]
pub struct Convolutional {
  filters: usize,
  channels: usize,
  size: usize,
  stride: usize,
  padding: usize,
  activation: Activation,
  /// (filters, channels * size * size)
  weights: Array2<f32>,
  biases: Array1<f32>,
}

#[derive(Error, Debug)]
pub enum BuildError {
  #[error(transparent)]
  Cfg(#[from] CfgError),
  #[error(transparent)]
  Weights(#[from] WeightsError),
  #[error("tensor reshape failed: {0}")]
  Shape(#[from] ndarray::ShapeError),
}

impl Convolutional {
  pub fn from_section(
    section: &Section,
    channels: usize,
    name: &str,
    weights: &mut WeightsReader,
  ) -> Result<Self, BuildError> {
    let filters: usize = section.require("filters")?;
    let size = window(section, "size", section.get_or("size", 1)?)?;
    let stride = window(section, "stride", section.get_or("stride", 1)?)?;
    let pad: usize = section.get_or("pad", 0)?;
    let padding = if pad != 0 {
      size / 2
    } else {
      window(section, "padding", section.get_or("padding", 0)?)?
    };
    let groups: usize = section.get_or("groups", 1)?;
    if groups != 1 {
      return Err(unsupported(section, "groups", &groups.to_string()).into());
    }
    if stride == 0 {
      return Err(unsupported(section, "stride", "0").into());
    }
    let batch_normalize = section.get_or("batch_normalize", 0)? != 0;
    let activation = activation_of(section)?;

    let mut biases = Array1::from(weights.take(filters, &format!("{name} biases"))?.to_vec());
    let scales = if batch_normalize {
      let scales = weights.take(filters, &format!("{name} scales"))?.to_vec();
      let means = weights
        .take(filters, &format!("{name} rolling mean"))?
        .to_vec();
      let variances = weights
        .take(filters, &format!("{name} rolling variance"))?
        .to_vec();
      let mut folded = Vec::with_capacity(filters);
      for f in 0..filters {
        let factor = scales[f] / (variances[f].sqrt() + BATCH_NORM_EPSILON);
        biases[f] -= means[f] * factor;
        folded.push(factor);
      }
      Some(folded)
    } else {
      None
    };

    let kernel = channels
      .checked_mul(size * size)
      .ok_or_else(|| unsupported(section, "size", &size.to_string()))?;
    let count = filters
      .checked_mul(kernel)
      .ok_or_else(|| unsupported(section, "filters", &filters.to_string()))?;
    let raw = weights.take(count, &format!("{name} weights"))?.to_vec();
    let mut kernel_weights = Array2::from_shape_vec((filters, kernel), raw)?;
    if let Some(factors) = scales {
      for (mut row, factor) in kernel_weights.axis_iter_mut(Axis(0)).zip(factors) {
        row.mapv_inplace(|w| w * factor);
      }
    }

    Ok(Self {
      filters,
      channels,
      size,
      stride,
      padding,
      activation,
      weights: kernel_weights,
      biases,
    })
  }

  pub fn filters(&self) -> usize {
    self.filters
  }

  pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, LayerError> {
    let (channels, height, width) = input.dim();
    if channels != self.channels {
      return Err(LayerError::ChannelMismatch {
        expected: self.channels,
        actual: channels,
      });
    }
    if height + 2 * self.padding < self.size || width + 2 * self.padding < self.size {
      return Err(LayerError::InputTooSmall {
        height,
        width,
        size: self.size,
      });
    }
    let out_h = (height + 2 * self.padding - self.size) / self.stride + 1;
    let out_w = (width + 2 * self.padding - self.size) / self.stride + 1;

    let mut output = if self.size == 1 && self.stride == 1 && self.padding == 0 {
      let standard = input.as_standard_layout();
      let flat = standard
        .view()
        .into_shape_with_order((channels, height * width))?;
      self.weights.dot(&flat)
    } else {
      let cols = im2col(
        input.view(),
        self.size,
        self.stride,
        self.padding,
        out_h,
        out_w,
      );
      self.weights.dot(&cols)
    };
    output += &self.biases.view().insert_axis(Axis(1));

    let mut output = output.into_shape_with_order((self.filters, out_h, out_w))?;
    self.activation.apply_inplace(&mut output);
    Ok(output)
  }
}

/// 将卷积窗口展开为矩阵，行序与 Darknet 权重布局 [c][ky][kx] 一致
fn im2col(
  input: ArrayView3<f32>,
  size: usize,
  stride: usize,
  padding: usize,
  out_h: usize,
  out_w: usize,
) -> Array2<f32> {
  let (channels, height, width) = input.dim();
  let mut cols = Array2::<f32>::zeros((channels * size * size, out_h * out_w));

  for c in 0..channels {
    for ky in 0..size {
      for kx in 0..size {
        let row = (c * size + ky) * size + kx;
        let mut dst = cols.row_mut(row);
        for oy in 0..out_h {
          let iy = (oy * stride + ky) as isize - padding as isize;
          if iy < 0 || iy >= height as isize {
            continue;
          }
          for ox in 0..out_w {
            let ix = (ox * stride + kx) as isize - padding as isize;
            if ix < 0 || ix >= width as isize {
              continue;
            }
            dst[oy * out_w + ox] = input[[c, iy as usize, ix as usize]];
          }
        }
      }
    }
  }

  cols
}

/// 最大池化，越界位置不参与比较
#[derive(Debug, Clone)]
pub struct MaxPool {
  size: usize,
  stride: usize,
  padding: usize,
}

impl MaxPool {
  pub fn from_section(section: &Section) -> Result<Self, CfgError> {
    let size = window(section, "size", section.get_or("size", 1)?)?;
    let stride = window(section, "stride", section.get_or("stride", 1)?)?;
    let padding = window(
      section,
      "padding",
      section.get_or("padding", size.saturating_sub(1))?,
    )?;
    if stride == 0 || size == 0 {
      return Err(unsupported(section, "stride", "0"));
    }
    Ok(Self {
      size,
      stride,
      padding,
    })
  }

  pub fn forward(&self, input: &Array3<f32>) -> Result<Array3<f32>, LayerError> {
    let (channels, height, width) = input.dim();
    if height + self.padding < self.size || width + self.padding < self.size {
      return Err(LayerError::InputTooSmall {
        height,
        width,
        size: self.size,
      });
    }
    let out_h = (height + self.padding - self.size) / self.stride + 1;
    let out_w = (width + self.padding - self.size) / self.stride + 1;
    let offset = (self.padding / 2) as isize;

    let mut output = Array3::<f32>::zeros((channels, out_h, out_w));
    for c in 0..channels {
      for oy in 0..out_h {
        for ox in 0..out_w {
          let mut best = f32::MIN;
          for ky in 0..self.size {
            let iy = (oy * self.stride + ky) as isize - offset;
            if iy < 0 || iy >= height as isize {
              continue;
            }
            for kx in 0..self.size {
              let ix = (ox * self.stride + kx) as isize - offset;
              if ix < 0 || ix >= width as isize {
                continue;
              }
              best = best.max(input[[c, iy as usize, ix as usize]]);
            }
          }
          output[[c, oy, ox]] = best;
        }
      }
    }
    Ok(output)
  }
}

/// 最近邻上采样
#[derive(Debug, Clone)]
pub struct Upsample {
  stride: usize,
  scale: f32,
}

impl Upsample {
  pub fn from_section(section: &Section) -> Result<Self, CfgError> {
    let stride: i64 = section.get_or("stride", 2)?;
    if stride <= 0 || stride as usize > MAX_WINDOW {
      return Err(unsupported(section, "stride", &stride.to_string()));
    }
    Ok(Self {
      stride: stride as usize,
      scale: section.get_or("scale", 1.0)?,
    })
  }

  pub fn forward(&self, input: &Array3<f32>) -> Array3<f32> {
    let (channels, height, width) = input.dim();
    let scale = self.scale;
    Array3::from_shape_fn(
      (channels, height * self.stride, width * self.stride),
      |(c, y, x)| input[[c, y / self.stride, x / self.stride]] * scale,
    )
  }
}

/// 按通道拼接若干层的输出
#[derive(Debug, Clone)]
pub struct Route {
  groups: usize,
  group_id: usize,
}

impl Route {
  pub fn from_section(section: &Section) -> Result<Self, CfgError> {
    let groups: usize = section.get_or("groups", 1)?;
    let group_id: usize = section.get_or("group_id", 0)?;
    if groups == 0 || group_id >= groups {
      return Err(unsupported(section, "group_id", &group_id.to_string()));
    }
    Ok(Self { groups, group_id })
  }

  pub fn out_channels(&self, input_channels: &[usize]) -> usize {
    input_channels.iter().map(|c| c / self.groups).sum()
  }

  pub fn forward(&self, inputs: &[&Array3<f32>]) -> Result<Array3<f32>, LayerError> {
    let Some(first) = inputs.first() else {
      return Err(LayerError::NotSpatial);
    };
    let (_, height, width) = first.dim();

    let mut parts = Vec::with_capacity(inputs.len());
    for input in inputs {
      let (channels, h, w) = input.dim();
      if h != height || w != width {
        return Err(LayerError::ShapeMismatch(first.dim(), input.dim()));
      }
      let part = channels / self.groups;
      let start = part * self.group_id;
      parts.push(input.slice(s![start..start + part, .., ..]));
    }
    Ok(ndarray::concatenate(Axis(0), &parts)?)
  }
}

/// 残差连接：与前一层逐元素相加后激活
#[derive(Debug, Clone)]
pub struct Shortcut {
  activation: Activation,
}

impl Shortcut {
  pub fn from_section(section: &Section) -> Result<Self, CfgError> {
    Ok(Self {
      activation: activation_of(section)?,
    })
  }

  pub fn forward(
    &self,
    previous: &Array3<f32>,
    from: &Array3<f32>,
  ) -> Result<Array3<f32>, LayerError> {
    if previous.dim() != from.dim() {
      return Err(LayerError::ShapeMismatch(previous.dim(), from.dim()));
    }
    let mut output = previous + from;
    self.activation.apply_inplace(&mut output);
    Ok(output)
  }
}

/// YOLO 检测头
///
/// 输出每个网格单元、每个锚框一行：`[cx, cy, w, h, objectness, class_1 .. class_N]`，
/// 坐标与尺寸相对网络输入归一化，类别分数已乘以 objectness。
#[derive(Debug, Clone)]
pub struct Yolo {
  classes: usize,
  anchors: Vec<(f32, f32)>,
  scale_x_y: f32,
}

impl Yolo {
  pub fn from_section(section: &Section) -> Result<Self, CfgError> {
    let classes: usize = section.get_or("classes", 20)?;
    let num: usize = section.get_or("num", 1)?;
    let all: Vec<f32> = section.list("anchors")?.unwrap_or_default();
    if all.len() < num * 2 {
      return Err(unsupported(
        section,
        "anchors",
        section.get("anchors").unwrap_or_default(),
      ));
    }
    let mask: Vec<usize> = section
      .list("mask")?
      .unwrap_or_else(|| (0..num).collect());

    let mut anchors = Vec::with_capacity(mask.len());
    for m in mask {
      if m >= num {
        return Err(unsupported(section, "mask", &m.to_string()));
      }
      anchors.push((all[2 * m], all[2 * m + 1]));
    }

    Ok(Self {
      classes,
      anchors,
      scale_x_y: section.get_or("scale_x_y", 1.0)?,
    })
  }

  pub fn row_width(&self) -> usize {
    5 + self.classes
  }

  pub fn forward(
    &self,
    input: &Array3<f32>,
    net_width: usize,
    net_height: usize,
  ) -> Result<Array2<f32>, LayerError> {
    let (channels, height, width) = input.dim();
    let stride = self.row_width();
    let num_anchors = self.anchors.len();
    if channels != num_anchors * stride {
      return Err(LayerError::ChannelMismatch {
        expected: num_anchors * stride,
        actual: channels,
      });
    }

    let bias = (self.scale_x_y - 1.0) / 2.0;
    let mut output = Array2::<f32>::zeros((height * width * num_anchors, stride));
    for y in 0..height {
      for x in 0..width {
        for (a, &(anchor_w, anchor_h)) in self.anchors.iter().enumerate() {
          let row = (y * width + x) * num_anchors + a;
          let base = a * stride;
          let at = |k: usize| input[[base + k, y, x]];

          let objectness = sigmoid(at(4));
          output[[row, 0]] = (x as f32 + sigmoid(at(0)) * self.scale_x_y - bias) / width as f32;
          output[[row, 1]] = (y as f32 + sigmoid(at(1)) * self.scale_x_y - bias) / height as f32;
          output[[row, 2]] = at(2).exp() * anchor_w / net_width as f32;
          output[[row, 3]] = at(3).exp() * anchor_h / net_height as f32;
          output[[row, 4]] = objectness;
          for k in 0..self.classes {
            output[[row, 5 + k]] = objectness * sigmoid(at(5 + k));
          }
        }
      }
    }
    Ok(output)
  }
}
