// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model/detector.rs - YOLO 目标检测器
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

use image::{ImageBuffer, Rgb, imageops::FilterType};
use ndarray::Array3;
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  darknet::{DarknetError, Network},
  frame::BgrFrame,
  model::{
    BBox, DetectResult, Detection, Model, ModelBundle,
    postprocess::{decode_candidates, nms_boxes, round_confidence},
  },
};

const YOLO_INPUT_W: u32 = 416;
const YOLO_INPUT_H: u32 = 416;
const YOLO_PIXEL_SCALE: f32 = 1.0 / 255.0;
const YOLO_CONFIDENCE_THRESH: f32 = 0.5;
const YOLO_SCORE_THRESH: f32 = 0.5;
const YOLO_NMS_THRESH: f32 = 0.4;

#[derive(Error, Debug)]
pub enum DetectError {
  #[error("image has no pixels ({0}x{1})")]
  EmptyFrame(u32, u32),
  #[error("{0}")]
  ForwardError(#[from] DarknetError),
  #[error("output rows have {0} columns, expected at least 6")]
  MalformedOutput(usize),
  #[error("class id {class_id} is out of range for {labels} labels")]
  LabelOutOfRange { class_id: usize, labels: usize },
}

/// 检测参数
#[derive(Debug, Clone, PartialEq)]
pub struct DetectorConfig {
  /// 网络输入宽度
  pub input_width: u32,
  /// 网络输入高度
  pub input_height: u32,
  /// 最大类别分数需严格大于该值
  pub confidence_threshold: f32,
  /// NMS 分数阈值
  pub score_threshold: f32,
  /// NMS IoU 阈值
  pub nms_threshold: f32,
  /// 为 true 时输入张量按 RGB 排列，默认保持 BGR
  pub swap_rb: bool,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      input_width: YOLO_INPUT_W,
      input_height: YOLO_INPUT_H,
      confidence_threshold: YOLO_CONFIDENCE_THRESH,
      score_threshold: YOLO_SCORE_THRESH,
      nms_threshold: YOLO_NMS_THRESH,
      swap_rb: false,
    }
  }
}

/// 构建网络输入张量 (3, H, W)
///
/// 用 `FilterType::Triangle` 缩放到输入尺寸（不裁剪、不保持宽高比），
/// 像素值乘以 1/255，不减均值。缩小时三角滤波的支撑范围随缩放比例扩大，
/// 因此大图的结果与只取 2x2 邻域的双线性插值不完全相同。
pub fn blob_from_frame(frame: &BgrFrame, config: &DetectorConfig) -> Result<Array3<f32>, DetectError> {
  let (width, height) = (frame.width(), frame.height());
  // 只借用 RgbImage 做缩放，通道实际为 BGR
  let buffer = ImageBuffer::<Rgb<u8>, _>::from_raw(width, height, frame.as_hwc())
    .filter(|_| width > 0 && height > 0)
    .ok_or(DetectError::EmptyFrame(width, height))?;
  let resized = image::imageops::resize(
    &buffer,
    config.input_width,
    config.input_height,
    FilterType::Triangle,
  );

  let input_w = config.input_width as usize;
  let input_h = config.input_height as usize;
  let mut blob = Array3::<f32>::zeros((3, input_h, input_w));
  for (idx, pixel) in resized.as_raw().chunks_exact(3).enumerate() {
    let (y, x) = (idx / input_w, idx % input_w);
    for c in 0..3 {
      let src = if config.swap_rb { 2 - c } else { c };
      blob[[c, y, x]] = pixel[src] as f32 * YOLO_PIXEL_SCALE;
    }
  }
  Ok(blob)
}

/// 使用默认参数检测
pub fn detect(
  frame: &BgrFrame,
  network: &Network,
  labels: &[String],
  output_layers: &[String],
) -> Result<Vec<Detection>, DetectError> {
  detect_with_config(frame, network, labels, output_layers, &DetectorConfig::default())
}

pub fn detect_with_config(
  frame: &BgrFrame,
  network: &Network,
  labels: &[String],
  output_layers: &[String],
  config: &DetectorConfig,
) -> Result<Vec<Detection>, DetectError> {
  let blob = blob_from_frame(frame, config)?;

  debug!("执行模型推理, 输出层: {:?}", output_layers);
  let outputs = network.forward(&blob, output_layers)?;

  // 框坐标按原图尺寸还原，而不是网络输入尺寸
  let candidates = decode_candidates(
    &outputs,
    frame.width(),
    frame.height(),
    config.confidence_threshold,
  )
  .map_err(DetectError::MalformedOutput)?;

  let boxes: Vec<BBox> = candidates.iter().map(|c| c.bbox).collect();
  let scores: Vec<f32> = candidates.iter().map(|c| c.confidence).collect();
  let kept = nms_boxes(&boxes, &scores, config.score_threshold, config.nms_threshold);
  debug!("NMS 后保留 {} / {} 个候选框", kept.len(), candidates.len());

  kept
    .into_iter()
    .map(|index| {
      let candidate = &candidates[index];
      let class = labels
        .get(candidate.class_id)
        .ok_or(DetectError::LabelOutOfRange {
          class_id: candidate.class_id,
          labels: labels.len(),
        })?;
      Ok(Detection {
        class: class.clone(),
        confidence: round_confidence(candidate.confidence),
        bbox: candidate.bbox,
      })
    })
    .collect()
}

/// 持有模型与参数的检测器
pub struct Detector {
  bundle: ModelBundle,
  config: DetectorConfig,
}

impl Detector {
  pub fn new(bundle: ModelBundle) -> Self {
    Self {
      bundle,
      config: DetectorConfig::default(),
    }
  }
}

impl Model for Detector {
  type Input = BgrFrame;
  type Output = DetectResult;
  type Error = DetectError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    let now = std::time::Instant::now();
    let detections = detect_with_config(
      input,
      &self.bundle.network,
      &self.bundle.labels,
      &self.bundle.output_layers,
      &self.config,
    )?;
    info!(
      "推理完成，耗时: {:.2?}, 检测到 {} 个物体",
      now.elapsed(),
      detections.len()
    );
    Ok(detections.into())
  }
}
