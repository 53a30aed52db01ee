// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/model/postprocess.rs - 检测输出后处理
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

use ndarray::Array2;
use tracing::debug;

use crate::model::BBox;

/// 每行前 5 列为 cx, cy, w, h, objectness
pub const CLASS_SCORE_OFFSET: usize = 5;

/// 通过置信度阈值的候选框
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BBox,
}

/// 返回最大值的下标，相同最大值取第一个；NaN 视为最大，遇到即返回
fn argmax(scores: impl Iterator<Item = f32>) -> Option<(usize, f32)> {
  let mut best: Option<(usize, f32)> = None;
  for (index, score) in scores.enumerate() {
    if score.is_nan() {
      return Some((index, score));
    }
    match best {
      Some((_, top)) if score <= top => {}
      _ => best = Some((index, score)),
    }
  }
  best
}

/// 将归一化的中心点框换算为原图像素下的左上角框，各步均向零截断
pub fn denormalize(row: &[f32], image_width: u32, image_height: u32) -> BBox {
  let center_x = (row[0] * image_width as f32) as i32;
  let center_y = (row[1] * image_height as f32) as i32;
  let width = (row[2] * image_width as f32) as i32;
  let height = (row[3] * image_height as f32) as i32;

  BBox {
    x: (center_x as f64 - width as f64 / 2.0) as i32,
    y: (center_y as f64 - height as f64 / 2.0) as i32,
    width,
    height,
  }
}

/// 从各输出层的行中筛出候选框
///
/// 置信度直接取最大类别分数，objectness 列不再相乘。
/// 行宽不足 6 列时返回 `Err(列数)`。
pub fn decode_candidates(
  outputs: &[Array2<f32>],
  image_width: u32,
  image_height: u32,
  confidence_threshold: f32,
) -> Result<Vec<Candidate>, usize> {
  let mut candidates = Vec::new();

  for output in outputs {
    if output.ncols() <= CLASS_SCORE_OFFSET {
      return Err(output.ncols());
    }
    for row in output.rows() {
      let Some((class_id, confidence)) =
        argmax(row.iter().skip(CLASS_SCORE_OFFSET).copied())
      else {
        continue;
      };
      // NaN 同样被丢弃
      if !(confidence > confidence_threshold) {
        continue;
      }
      let values = [row[0], row[1], row[2], row[3]];
      candidates.push(Candidate {
        class_id,
        confidence,
        bbox: denormalize(&values, image_width, image_height),
      });
    }
  }

  debug!("通过置信度阈值的候选框: {}", candidates.len());
  Ok(candidates)
}

fn intersection_area(a: &BBox, b: &BBox) -> i64 {
  let x1 = a.x.max(b.x) as i64;
  let y1 = a.y.max(b.y) as i64;
  let x2 = (a.x as i64 + a.width as i64).min(b.x as i64 + b.width as i64);
  let y2 = (a.y as i64 + a.height as i64).min(b.y as i64 + b.height as i64);
  if x2 <= x1 || y2 <= y1 {
    return 0;
  }
  (x2 - x1) * (y2 - y1)
}

/// 两个整数框的交并比；两个框面积都为零时视为完全重叠
pub fn iou(a: &BBox, b: &BBox) -> f64 {
  let area_a = a.area();
  let area_b = b.area();
  if area_a + area_b <= 0 {
    return 1.0;
  }
  let inter = intersection_area(a, b);
  inter as f64 / (area_a + area_b - inter) as f64
}

/// 类别无关的非极大值抑制
///
/// 分数高于 `score_threshold` 的框按分数从高到低（稳定排序）逐个检查，
/// 与所有已保留框的 IoU 都不超过 `nms_threshold` 时保留。
/// 返回保留框的下标，按分数从高到低排列。
pub fn nms_boxes(
  boxes: &[BBox],
  scores: &[f32],
  score_threshold: f32,
  nms_threshold: f32,
) -> Vec<usize> {
  let mut order: Vec<usize> = (0..boxes.len().min(scores.len()))
    .filter(|&i| scores[i] > score_threshold)
    .collect();
  order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));

  let mut kept: Vec<usize> = Vec::with_capacity(order.len());
  for index in order {
    let keep = kept
      .iter()
      .all(|&k| iou(&boxes[index], &boxes[k]) as f32 <= nms_threshold);
    if keep {
      kept.push(index);
    }
  }
  kept
}

/// 保留两位小数，恰好居中时取偶数
///
/// f32 乘以 100 在 f64 中没有舍入误差，因此按精确值判断是否居中。
pub fn round_confidence(confidence: f32) -> f64 {
  (confidence as f64 * 100.0).round_ties_even() / 100.0
}

#[cfg(test)]
mod tests {
  use super::*;
  use ndarray::array;

  fn bbox(x: i32, y: i32, width: i32, height: i32) -> BBox {
    BBox {
      x,
      y,
      width,
      height,
    }
  }

  #[test]
  fn argmax_prefers_first_maximum() {
    assert_eq!(argmax([0.1, 0.7, 0.7].into_iter()), Some((1, 0.7)));
    assert_eq!(argmax(std::iter::empty()), None);
  }

  #[test]
  fn argmax_stops_at_nan() {
    let (index, score) = argmax([0.2, f32::NAN, 0.9].into_iter()).unwrap();
    assert_eq!(index, 1);
    assert!(score.is_nan());

    // NaN 行不会通过置信度阈值
    let output = array![[0.5f32, 0.5, 0.2, 0.2, 0.9, f32::NAN, 0.9]];
    assert!(decode_candidates(&[output], 100, 100, 0.5).unwrap().is_empty());
  }

  #[test]
  fn denormalize_truncates() {
    let b = denormalize(&[0.5, 0.25, 0.3, 0.1], 101, 50);
    // cx = 50, cy = 12, w = 30, h = 5
    assert_eq!(b, bbox(35, 9, 30, 5));

    // 负坐标向零截断
    let b = denormalize(&[0.0, 0.0, 0.25, 0.25], 100, 100);
    assert_eq!(b, bbox(-12, -12, 25, 25));
  }

  #[test]
  fn candidates_use_max_class_score_only() {
    let output = array![
      // objectness 很低，但类别分数高：仍然保留
      [0.5f32, 0.5, 0.2, 0.2, 0.01, 0.1, 0.9],
      // 阈值是严格大于
      [0.5, 0.5, 0.2, 0.2, 0.99, 0.5, 0.2],
      [0.1, 0.1, 0.1, 0.1, 0.99, 0.6, 0.3],
    ];
    let candidates = decode_candidates(&[output], 100, 100, 0.5).unwrap();
    assert_eq!(candidates.len(), 2);
    assert_eq!(candidates[0].class_id, 1);
    assert_eq!(candidates[0].confidence, 0.9);
    assert_eq!(candidates[0].bbox, bbox(40, 40, 20, 20));
    assert_eq!(candidates[1].class_id, 0);
  }

  #[test]
  fn candidates_need_class_columns() {
    let output = Array2::<f32>::zeros((3, 5));
    assert_eq!(decode_candidates(&[output], 10, 10, 0.5), Err(5));
  }

  #[test]
  fn iou_of_integer_boxes() {
    let a = bbox(0, 0, 10, 10);
    assert_eq!(iou(&a, &a), 1.0);
    assert_eq!(iou(&a, &bbox(10, 0, 10, 10)), 0.0);
    assert!((iou(&a, &bbox(5, 0, 10, 10)) - 50.0 / 150.0).abs() < 1e-12);
    assert_eq!(iou(&bbox(3, 3, 0, 0), &bbox(9, 9, 0, 0)), 1.0);
  }

  #[test]
  fn nms_suppresses_across_classes() {
    // 同一物体的 dog 框与 cat 框，IoU 约 0.68
    let boxes = [bbox(0, 0, 100, 100), bbox(10, 10, 100, 100), bbox(300, 300, 20, 20)];
    let scores = [0.7, 0.9, 0.6];
    assert_eq!(nms_boxes(&boxes, &scores, 0.5, 0.4), [1, 2]);
  }

  #[test]
  fn nms_keeps_boxes_at_threshold_and_filters_scores() {
    // IoU 恰好为 0.4 时保留
    let boxes = [bbox(0, 0, 10, 10), bbox(0, 0, 4, 10)];
    assert_eq!(iou(&boxes[0], &boxes[1]), 0.4);
    assert_eq!(nms_boxes(&boxes, &[0.9, 0.8], 0.5, 0.4), [0, 1]);
    assert_eq!(nms_boxes(&boxes, &[0.9, 0.5], 0.5, 0.4), [0]);
    assert!(nms_boxes(&[], &[], 0.5, 0.4).is_empty());
  }

  #[test]
  fn nms_ties_keep_input_order() {
    let boxes = [bbox(0, 0, 10, 10), bbox(1, 1, 10, 10), bbox(50, 50, 10, 10)];
    assert_eq!(nms_boxes(&boxes, &[0.8, 0.8, 0.8], 0.5, 0.4), [0, 2]);
  }

  #[test]
  fn nms_is_idempotent() {
    let boxes: Vec<BBox> = (0..40)
      .map(|i| bbox((i * 7) % 60, (i * 13) % 50, 20 + i % 9, 15 + i % 5))
      .collect();
    let scores: Vec<f32> = (0..40).map(|i| 0.51 + ((i * 37) % 48) as f32 / 100.0).collect();

    let first = nms_boxes(&boxes, &scores, 0.5, 0.4);
    let kept_boxes: Vec<BBox> = first.iter().map(|&i| boxes[i]).collect();
    let kept_scores: Vec<f32> = first.iter().map(|&i| scores[i]).collect();
    let second = nms_boxes(&kept_boxes, &kept_scores, 0.5, 0.4);
    assert_eq!(second, (0..first.len()).collect::<Vec<_>>());
  }

  #[test]
  fn confidence_rounding() {
    assert_eq!(round_confidence(0.987), 0.99);
    assert_eq!(round_confidence(0.5012), 0.5);
    assert_eq!(round_confidence(1.0), 1.0);
  }

  #[test]
  fn confidence_rounding_ties_to_even() {
    assert_eq!(round_confidence(0.625), 0.62);
    assert_eq!(round_confidence(0.875), 0.88);
    assert_eq!(round_confidence(0.5625), 0.56);
  }
}
