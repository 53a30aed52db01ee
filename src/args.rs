// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;

/// 从标准输入读取一张图像，运行 YOLOv3 检测，向标准输出打印一行 JSON
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 存放 yolov3.weights、yolov3.cfg 与 coco.names 的目录，默认为可执行文件所在目录
  #[arg(long, value_name = "DIR")]
  pub model_dir: Option<PathBuf>,

  /// 额外保存一张画有检测框的图像
  #[cfg(feature = "save_image_file")]
  #[arg(long, value_name = "PATH")]
  pub annotate: Option<PathBuf>,

  /// 超过该秒数仍未完成时放弃检测并输出超时错误
  #[arg(long, value_name = "SECONDS", value_parser = clap::value_parser!(u64).range(1..))]
  pub timeout: Option<u64>,

  /// 日志级别，日志只写到标准错误
  #[arg(long, default_value = "warn", value_name = "LEVEL")]
  pub log_level: tracing::Level,
}
