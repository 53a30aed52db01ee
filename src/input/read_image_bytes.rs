// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/input/read_image_bytes.rs - 从字节流读取并解码图像
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

use std::io::{Cursor, Read};

use image::ImageReader;
use thiserror::Error;
use tracing::{debug, error};

use crate::frame::BgrFrame;

#[derive(Error, Debug)]
pub enum DecodeError {
  #[error("{0}")]
  IoError(#[from] std::io::Error),
  #[error("{0}")]
  ImageLoadError(#[from] image::ImageError),
}

/// 读取输入流的全部字节
pub fn read_all<R: Read>(mut reader: R) -> Result<Vec<u8>, std::io::Error> {
  let mut buffer = Vec::new();
  reader.read_to_end(&mut buffer)?;
  debug!("读取到 {} 字节输入", buffer.len());
  Ok(buffer)
}

/// 将编码后的图像字节解码为 BGR 帧
///
/// 格式由内容推断，支持 `image` 支持的所有常见格式；
/// 带 alpha 或灰度图像统一转为三通道。
pub fn decode_image(bytes: &[u8]) -> Result<BgrFrame, DecodeError> {
  let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
  debug!("推断图像格式: {:?}", reader.format());

  let image = reader.decode().inspect_err(|e| {
    error!("图像解码失败: {}", e);
  })?;
  debug!("图像尺寸: {}x{}", image.width(), image.height());

  Ok(BgrFrame::from(image.into_rgb8()))
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};

  fn png_bytes(image: image::DynamicImage) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    image.write_to(&mut bytes, ImageFormat::Png).unwrap();
    bytes.into_inner()
  }

  #[test]
  fn decodes_png_as_bgr() {
    let image = RgbImage::from_pixel(3, 2, Rgb([255, 128, 0]));
    let frame = decode_image(&png_bytes(image.into())).unwrap();
    assert_eq!((frame.width(), frame.height()), (3, 2));
    assert_eq!(frame.pixel(2, 1), [0, 128, 255]);
  }

  #[test]
  fn drops_alpha_channel() {
    let image = RgbaImage::from_pixel(1, 1, Rgba([1, 2, 3, 4]));
    let frame = decode_image(&png_bytes(image.into())).unwrap();
    assert_eq!(frame.as_hwc(), &[3u8, 2, 1]);
  }

  #[test]
  fn truncated_bytes_are_decode_errors() {
    let image = RgbImage::from_pixel(16, 16, Rgb([9, 9, 9]));
    let bytes = png_bytes(image.into());
    assert!(decode_image(&bytes[..bytes.len() / 2]).is_err());
    assert!(matches!(
      decode_image(b"definitely not an image"),
      Err(DecodeError::ImageLoadError(_))
    ));
  }

  #[test]
  fn reads_everything() {
    let data = read_all(&b"abc"[..]).unwrap();
    assert_eq!(data, b"abc");
    assert!(read_all(std::io::empty()).unwrap().is_empty());
  }
}
