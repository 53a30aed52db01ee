// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output/annotate.rs - 保存带检测框的图像
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

use std::path::PathBuf;

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
  frame::BgrFrame,
  model::{BBox, DetectResult},
  output::Render,
};

const BOX_COLOR: [u8; 3] = [0, 255, 0];
const BOX_THICKNESS: i32 = 2;

#[derive(Error, Debug)]
pub enum AnnotateError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 把检测框画在原图上并保存到文件，格式由扩展名决定
pub struct AnnotateOutput {
  path: PathBuf,
  color: [u8; 3],
}

impl AnnotateOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self {
      path: path.into(),
      color: BOX_COLOR,
    }
  }

  pub fn with_color(mut self, color: [u8; 3]) -> Self {
    self.color = color;
    self
  }

  fn draw_bbox(&self, image: &mut RgbImage, bbox: &BBox) {
    // 由外向内画两圈
    for inset in 0..BOX_THICKNESS {
      let width = bbox.width - 2 * inset;
      let height = bbox.height - 2 * inset;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(bbox.x + inset, bbox.y + inset).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, Rgb(self.color));
    }
  }

  fn save_image(&self, image: RgbImage) -> Result<(), AnnotateError> {
    if let Some(parent) = self.path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    image.save(&self.path)?;
    warn!("保存标注图像到文件: {}", self.path.display());
    Ok(())
  }
}

impl Render<BgrFrame, DetectResult> for AnnotateOutput {
  type Error = AnnotateError;

  fn render_result(&self, frame: &BgrFrame, result: &DetectResult) -> Result<(), Self::Error> {
    let mut image = frame.to_rgb_image();
    for item in result.items.iter() {
      debug!("绘制 {} {:.2} {:?}", item.class, item.confidence, item.bbox);
      self.draw_bbox(&mut image, &item.bbox);
    }
    self.save_image(image)
  }
}
