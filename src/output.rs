// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/output.rs - 输出定义
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

use std::{fmt::Display, io};

use serde::Serialize;
use thiserror::Error;

use crate::{
  frame::BgrFrame,
  model::{DetectResult, Detection},
};

pub trait Render<Frame, Output>: Sized {
  type Error;
  fn render_result(&self, frame: &Frame, result: &Output) -> Result<(), Self::Error>;
}

mod json;
pub use self::json::PythonFormatter;

#[cfg(feature = "save_image_file")]
mod annotate;
#[cfg(feature = "save_image_file")]
pub use self::annotate::{AnnotateError, AnnotateOutput};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] io::Error),
  #[error("JSON 序列化错误: {0}")]
  JsonError(#[from] serde_json::Error),
}

/// 标准输出上的唯一一行 JSON
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Report<'a> {
  Success {
    success: bool,
    detections: &'a [Detection],
    count: usize,
  },
  Failure {
    error: String,
  },
}

impl<'a> Report<'a> {
  pub fn success(detections: &'a [Detection]) -> Self {
    Report::Success {
      success: true,
      detections,
      count: detections.len(),
    }
  }

  pub fn failure(message: impl Display) -> Self {
    Report::Failure {
      error: message.to_string(),
    }
  }

  pub fn is_success(&self) -> bool {
    matches!(self, Report::Success { .. })
  }
}

/// 序列化为单行 JSON（不含换行符）
pub fn to_json_line(report: &Report) -> Result<String, OutputError> {
  let mut buffer = Vec::new();
  let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, PythonFormatter);
  report.serialize(&mut serializer)?;
  // 输出只含 ASCII
  Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// 写出一行 JSON 并刷新
pub fn write_report<W: io::Write>(writer: &mut W, report: &Report) -> Result<(), OutputError> {
  let line = to_json_line(report)?;
  writeln!(writer, "{}", line)?;
  writer.flush()?;
  Ok(())
}

/// 把报告写到标准输出
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonOutput;

impl JsonOutput {
  pub fn emit(&self, report: &Report) -> Result<(), OutputError> {
    let stdout = io::stdout();
    let mut lock = stdout.lock();
    write_report(&mut lock, report)
  }
}

impl Render<BgrFrame, DetectResult> for JsonOutput {
  type Error = OutputError;

  fn render_result(&self, _frame: &BgrFrame, result: &DetectResult) -> Result<(), Self::Error> {
    self.emit(&Report::success(&result.items))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;

  fn dog() -> Detection {
    Detection {
      class: "dog".to_string(),
      confidence: 0.97,
      bbox: BBox {
        x: 120,
        y: 80,
        width: 200,
        height: 150,
      },
    }
  }

  #[test]
  fn empty_success_line() {
    let line = to_json_line(&Report::success(&[])).unwrap();
    assert_eq!(line, r#"{"success": true, "detections": [], "count": 0}"#);
  }

  #[test]
  fn success_line_with_detection() {
    let items = [dog()];
    let line = to_json_line(&Report::success(&items)).unwrap();
    assert_eq!(
      line,
      r#"{"success": true, "detections": [{"class": "dog", "confidence": 0.97, "bbox": {"x": 120, "y": 80, "width": 200, "height": 150}}], "count": 1}"#
    );
  }

  #[test]
  fn failure_line() {
    let line = to_json_line(&Report::failure("No image data received")).unwrap();
    assert_eq!(line, r#"{"error": "No image data received"}"#);
    assert!(!Report::failure("x").is_success());
  }

  #[test]
  fn whole_number_confidence_keeps_fraction() {
    let mut item = dog();
    item.confidence = 1.0;
    let items = [item];
    let line = to_json_line(&Report::success(&items)).unwrap();
    assert!(line.contains(r#""confidence": 1.0,"#));
  }

  #[test]
  fn report_ends_with_single_newline() {
    let mut out = Vec::new();
    write_report(&mut out, &Report::success(&[])).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert!(text.ends_with("}\n"));
    assert_eq!(text.matches('\n').count(), 1);
  }
}
