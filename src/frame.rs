// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/frame.rs - BGR 帧定义
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

use image::{ImageBuffer, Rgb, RgbImage};

const BGR_CHANNELS: usize = 3;

/// 以 (height, width, 3) 排列、通道顺序为 BGR 的像素网格
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BgrFrame {
  width: u32,
  height: u32,
  data: Box<[u8]>,
}

impl BgrFrame {
  /// 由 HWC 排列的 BGR 字节构建帧，长度不匹配时返回 `None`
  pub fn from_hwc(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
    if data.len() != BGR_CHANNELS * width as usize * height as usize {
      return None;
    }
    Some(Self {
      width,
      height,
      data: data.into_boxed_slice(),
    })
  }

  pub fn width(&self) -> u32 {
    self.width
  }

  pub fn height(&self) -> u32 {
    self.height
  }

  pub fn as_hwc(&self) -> &[u8] {
    &self.data
  }

  /// 位于 (x, y) 的像素，按 [b, g, r] 返回
  pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
    let idx = (y as usize * self.width as usize + x as usize) * BGR_CHANNELS;
    [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
  }

  /// 转回 RGB 图像，用于保存或绘制
  pub fn to_rgb_image(&self) -> RgbImage {
    ImageBuffer::from_fn(self.width, self.height, |x, y| {
      let [b, g, r] = self.pixel(x, y);
      Rgb([r, g, b])
    })
  }
}

impl From<RgbImage> for BgrFrame {
  fn from(image: RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let mut data = image.into_raw();
    // RGB -> BGR
    for pixel in data.chunks_exact_mut(BGR_CHANNELS) {
      pixel.swap(0, 2);
    }
    Self {
      width,
      height,
      data: data.into_boxed_slice(),
    }
  }
}
