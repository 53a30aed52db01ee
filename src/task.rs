// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/task.rs - 单次检测任务
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

use std::{
  fmt,
  io::Read,
  path::PathBuf,
  sync::mpsc::{self, RecvTimeoutError},
  thread,
  time::{Duration, Instant},
};

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::{
  frame::BgrFrame,
  input::{DecodeError, decode_image, read_all},
  model::{DetectError, DetectResult, Detector, Model, ModelBundle, ModelLoadError},
};

pub const MODEL_LOAD_MESSAGE: &str =
  "Failed to load YOLO model. Check if yolov3.weights, yolov3.cfg, and coco.names exist.";
pub const EMPTY_INPUT_MESSAGE: &str = "No image data received";
pub const TIMEOUT_MESSAGE: &str = "Detection process timed out";

/// 失败发生的阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  ModelLoad,
  EmptyInput,
  Decode,
  Inference,
  Timeout,
}

impl fmt::Display for ErrorKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ErrorKind::ModelLoad => "model_load",
      ErrorKind::EmptyInput => "empty_input",
      ErrorKind::Decode => "decode",
      ErrorKind::Inference => "inference",
      ErrorKind::Timeout => "timeout",
    };
    f.write_str(name)
  }
}

/// `Display` 即为写入 JSON `error` 字段的文本
#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("Failed to load YOLO model. Check if yolov3.weights, yolov3.cfg, and coco.names exist.")]
  ModelLoad(#[source] ModelLoadError),
  #[error("No image data received")]
  EmptyInput,
  #[error("Detection failed: {0}")]
  Decode(#[source] DecodeError),
  #[error("Detection failed: {0}")]
  Inference(#[source] DetectError),
  #[error("Detection process timed out")]
  Timeout(Duration),
  #[error("Detection failed: worker thread stopped unexpectedly")]
  WorkerLost,
}

impl PipelineError {
  pub fn kind(&self) -> ErrorKind {
    match self {
      PipelineError::ModelLoad(_) => ErrorKind::ModelLoad,
      PipelineError::EmptyInput => ErrorKind::EmptyInput,
      PipelineError::Decode(_) => ErrorKind::Decode,
      PipelineError::Inference(_) | PipelineError::WorkerLost => ErrorKind::Inference,
      PipelineError::Timeout(_) => ErrorKind::Timeout,
    }
  }
}

/// 一次成功运行的结果：解码后的原图与检测结果
#[derive(Debug, Clone)]
pub struct Outcome {
  pub frame: BgrFrame,
  pub detections: DetectResult,
}

/// 加载模型 → 读取输入 → 解码 → 检测
pub struct OneShotTask {
  model_dir: PathBuf,
}

impl OneShotTask {
  pub fn new(model_dir: impl Into<PathBuf>) -> Self {
    Self {
      model_dir: model_dir.into(),
    }
  }

  /// 在工作线程中运行，超过 `timeout` 仍未完成时返回 `Timeout`
  ///
  /// 超时后工作线程不会被等待，随进程退出结束。
  pub fn run_with_timeout<R: Read + Send + 'static>(
    self,
    input: R,
    timeout: Duration,
  ) -> Result<Outcome, PipelineError> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
      let _ = tx.send(self.run(input));
    });

    match rx.recv_timeout(timeout) {
      Ok(result) => result,
      Err(RecvTimeoutError::Timeout) => {
        warn!("任务超过 {:.2?} 未完成", timeout);
        Err(PipelineError::Timeout(timeout))
      }
      Err(RecvTimeoutError::Disconnected) => Err(PipelineError::WorkerLost),
    }
  }

  pub fn run<R: Read>(self, mut input: R) -> Result<Outcome, PipelineError> {
    info!("开始任务...");
    let started = Instant::now();
    let bundle = ModelBundle::load(&self.model_dir).map_err(PipelineError::ModelLoad)?;
    let model = Detector::new(bundle);
    info!("模型加载成功");

    // 读取失败按解码失败处理
    let bytes = read_all(&mut input).map_err(|e| PipelineError::Decode(e.into()))?;
    if bytes.is_empty() {
      warn!("标准输入为空");
      return Err(PipelineError::EmptyInput);
    }
    debug!("读取输入 {} 字节", bytes.len());

    let frame = decode_image(&bytes).map_err(PipelineError::Decode)?;
    info!("输入帧解码成功 {}x{}，开始推理...", frame.width(), frame.height());

    let detections = model.infer(&frame).map_err(PipelineError::Inference)?;
    info!(
      "任务完成，总耗时: {:.2?}, 检测到 {} 个物体",
      started.elapsed(),
      detections.len()
    );

    Ok(Outcome { frame, detections })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn messages_match_report_contract() {
    assert_eq!(PipelineError::EmptyInput.to_string(), EMPTY_INPUT_MESSAGE);
    let err = PipelineError::ModelLoad(ModelLoadError::NoOutputLayers);
    assert_eq!(err.to_string(), MODEL_LOAD_MESSAGE);
    assert_eq!(err.kind(), ErrorKind::ModelLoad);

    let err = PipelineError::Inference(DetectError::MalformedOutput(4));
    assert_eq!(
      err.to_string(),
      "Detection failed: output rows have 4 columns, expected at least 6"
    );
    assert_eq!(err.kind().to_string(), "inference");

    let err = PipelineError::Timeout(Duration::from_secs(30));
    assert_eq!(err.to_string(), TIMEOUT_MESSAGE);
    assert_eq!(err.kind(), ErrorKind::Timeout);
  }

  #[test]
  fn fast_failures_finish_within_timeout() {
    let err = OneShotTask::new("/nonexistent/liaowang")
      .run_with_timeout(std::io::empty(), Duration::from_secs(30))
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelLoad);
  }

  #[test]
  fn load_failure_comes_before_reading_input() {
    struct Unreadable;
    impl Read for Unreadable {
      fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
        panic!("input must not be read when the model is missing");
      }
    }
    let err = OneShotTask::new("/nonexistent/liaowang")
      .run(Unreadable)
      .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ModelLoad);
  }
}
