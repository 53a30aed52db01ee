// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use tracing::{error, info, warn};

use liaowang::{
  output::{JsonOutput, Render, Report},
  task::{OneShotTask, Outcome},
};

use args::Args;

/// 默认模型目录：可执行文件所在目录
fn default_model_dir() -> PathBuf {
  match std::env::current_exe() {
    Ok(exe) => exe
      .parent()
      .map(|dir| dir.to_path_buf())
      .unwrap_or_else(|| PathBuf::from(".")),
    Err(e) => {
      warn!("无法确定可执行文件路径: {}，使用当前目录", e);
      PathBuf::from(".")
    }
  }
}

#[cfg(feature = "save_image_file")]
fn save_annotation(args: &Args, outcome: &Outcome) -> anyhow::Result<()> {
  use anyhow::Context;

  let Some(path) = &args.annotate else {
    return Ok(());
  };
  liaowang::output::AnnotateOutput::new(path)
    .render_result(&outcome.frame, &outcome.detections)
    .with_context(|| format!("无法保存标注图像 {}", path.display()))
}

#[cfg(not(feature = "save_image_file"))]
fn save_annotation(_args: &Args, _outcome: &Outcome) -> anyhow::Result<()> {
  Ok(())
}

fn main() -> ExitCode {
  let args = Args::parse();

  tracing_subscriber::fmt()
    .with_max_level(args.log_level)
    .with_writer(std::io::stderr)
    .init();

  let model_dir = args.model_dir.clone().unwrap_or_else(default_model_dir);
  info!("模型目录: {}", model_dir.display());

  let task = OneShotTask::new(model_dir);
  let result = match args.timeout {
    Some(seconds) => task.run_with_timeout(std::io::stdin(), Duration::from_secs(seconds)),
    None => task.run(std::io::stdin().lock()),
  };

  let output = JsonOutput;
  let (emitted, code) = match result {
    Ok(outcome) => {
      // 标注失败不影响结果输出
      if let Err(e) = save_annotation(&args, &outcome) {
        warn!("{:#}", e);
      }
      (
        output.render_result(&outcome.frame, &outcome.detections),
        ExitCode::SUCCESS,
      )
    }
    Err(e) => {
      error!("任务失败 [{}]: {}", e.kind(), e);
      (output.emit(&Report::failure(&e)), ExitCode::FAILURE)
    }
  };

  if let Err(e) = emitted {
    error!("无法写出结果: {}", e);
    return ExitCode::FAILURE;
  }
  code
}
