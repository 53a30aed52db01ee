// 该文件是 Liaowang （瞭望） 项目的一部分。
// tests/common/mod.rs - 集成测试用的微型 Darknet 模型
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

#![allow(dead_code)]

use std::{
  io::Cursor,
  path::{Path, PathBuf},
};

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

// 1x1 卷积、步长 416，得到 1x1 网格；锚框与网络输入等大
const TINY_CFG: &str = "\
[net]
width=416
height=416
channels=3

[convolutional]
filters=7
size=1
stride=416
activation=linear

[yolo]
mask=0
anchors=416,416
classes=2
num=1
";

pub const LABELS: &str = "person\ndog\n";

/// 卷积核全为零，输出只由偏置决定：tx, ty, tw, th, objectness, person, dog
fn weights(biases: [f32; 7]) -> Vec<u8> {
  let mut bytes = Vec::new();
  for header in [0i32, 2, 0] {
    bytes.extend_from_slice(&header.to_le_bytes());
  }
  bytes.extend_from_slice(&0u64.to_le_bytes());
  let kernel = [0.0f32; 7 * 3];
  for value in biases.iter().chain(kernel.iter()) {
    bytes.extend_from_slice(&value.to_le_bytes());
  }
  bytes
}

/// 每次调用都得到一个干净的临时目录
pub fn scratch_dir(name: &str) -> PathBuf {
  let dir = std::env::temp_dir().join(format!("liaowang-it-{}-{}", name, std::process::id()));
  let _ = std::fs::remove_dir_all(&dir);
  std::fs::create_dir_all(&dir).unwrap();
  dir
}

fn write_model(dir: &Path, biases: [f32; 7]) {
  std::fs::write(dir.join("yolov3.cfg"), TINY_CFG).unwrap();
  std::fs::write(dir.join("yolov3.weights"), weights(biases)).unwrap();
  std::fs::write(dir.join("coco.names"), LABELS).unwrap();
}

/// 整幅图像中心一个 person 框，置信度约 0.88
pub fn confident_model(name: &str) -> PathBuf {
  let dir = scratch_dir(name);
  write_model(&dir, [0.0, 0.0, 0.0, 0.0, 10.0, 2.0, -5.0]);
  dir
}

/// 所有类别分数都远低于阈值
pub fn silent_model(name: &str) -> PathBuf {
  let dir = scratch_dir(name);
  write_model(&dir, [0.0, 0.0, 0.0, 0.0, 10.0, -5.0, -5.0]);
  dir
}

// 一层 2x2 卷积降到 208x208 后接多层 256 通道的 1x1 卷积，单次前向需要上百 GFLOP
const SLOW_CHANNELS: usize = 256;
const SLOW_DEPTH: usize = 24;

fn slow_cfg() -> String {
  let mut cfg = String::from("[net]\nwidth=416\nheight=416\nchannels=3\n\n");
  cfg.push_str(&format!(
    "[convolutional]\nfilters={SLOW_CHANNELS}\nsize=2\nstride=2\nactivation=linear\n\n"
  ));
  for _ in 0..SLOW_DEPTH {
    cfg.push_str(&format!(
      "[convolutional]\nfilters={SLOW_CHANNELS}\nsize=1\nstride=1\nactivation=linear\n\n"
    ));
  }
  cfg.push_str("[convolutional]\nfilters=7\nsize=1\nstride=208\nactivation=linear\n\n");
  cfg.push_str("[yolo]\nmask=0\nanchors=416,416\nclasses=2\nnum=1\n");
  cfg
}

fn slow_weights() -> Vec<u8> {
  let count = (SLOW_CHANNELS + SLOW_CHANNELS * 3 * 2 * 2)
    + SLOW_DEPTH * (SLOW_CHANNELS + SLOW_CHANNELS * SLOW_CHANNELS)
    + (7 + 7 * SLOW_CHANNELS);
  let mut bytes = Vec::with_capacity(20 + count * 4);
  for header in [0i32, 2, 0] {
    bytes.extend_from_slice(&header.to_le_bytes());
  }
  bytes.extend_from_slice(&0u64.to_le_bytes());
  bytes.resize(bytes.len() + count * 4, 0);
  bytes
}

/// 结构合法但推理很慢，用于超时测试
pub fn slow_model(name: &str) -> PathBuf {
  let dir = scratch_dir(name);
  std::fs::write(dir.join("yolov3.cfg"), slow_cfg()).unwrap();
  std::fs::write(dir.join("yolov3.weights"), slow_weights()).unwrap();
  std::fs::write(dir.join("coco.names"), LABELS).unwrap();
  dir
}

pub fn png(width: u32, height: u32) -> Vec<u8> {
  let image = RgbImage::from_pixel(width, height, Rgb([90, 120, 200]));
  let mut bytes = Cursor::new(Vec::new());
  DynamicImage::from(image)
    .write_to(&mut bytes, ImageFormat::Png)
    .unwrap();
  bytes.into_inner()
}
