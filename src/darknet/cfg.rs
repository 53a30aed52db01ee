// 该文件是 Liaowang （瞭望） 项目的一部分。
// src/darknet/cfg.rs - Darknet 网络结构配置解析
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

use std::collections::HashMap;
use std::str::FromStr;

use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum CfgError {
  #[error("line {line}: option before any [section]")]
  OptionOutsideSection { line: usize },
  #[error("line {line}: cannot parse `{text}`")]
  Malformed { line: usize, text: String },
  #[error("[{section}] at line {line}: missing option `{key}`")]
  MissingOption {
    section: String,
    line: usize,
    key: String,
  },
  #[error("[{section}] at line {line}: invalid value `{value}` for `{key}`")]
  InvalidOption {
    section: String,
    line: usize,
    key: String,
    value: String,
  },
  #[error("first section must be [net], found [{0}]")]
  MissingNet(String),
  #[error("configuration is empty")]
  Empty,
}

/// 配置文件中的一个段落，例如 `[convolutional]`
#[derive(Debug, Clone)]
pub struct Section {
  name: String,
  line: usize,
  options: HashMap<String, String>,
}

impl Section {
  fn new(name: &str, line: usize) -> Self {
    Self {
      name: canonical_name(name).to_string(),
      line,
      options: HashMap::new(),
    }
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub fn line(&self) -> usize {
    self.line
  }

  pub fn get(&self, key: &str) -> Option<&str> {
    self.options.get(key).map(String::as_str)
  }

  fn invalid(&self, key: &str, value: &str) -> CfgError {
    CfgError::InvalidOption {
      section: self.name.clone(),
      line: self.line,
      key: key.to_string(),
      value: value.to_string(),
    }
  }

  /// 读取必填选项
  pub fn require<T: FromStr>(&self, key: &str) -> Result<T, CfgError> {
    let value = self.get(key).ok_or_else(|| CfgError::MissingOption {
      section: self.name.clone(),
      line: self.line,
      key: key.to_string(),
    })?;
    value.parse().map_err(|_| self.invalid(key, value))
  }

  /// 读取选项，缺省时返回默认值
  pub fn get_or<T: FromStr>(&self, key: &str, default: T) -> Result<T, CfgError> {
    match self.get(key) {
      Some(value) => value.parse().map_err(|_| self.invalid(key, value)),
      None => Ok(default),
    }
  }

  /// 读取逗号分隔的列表选项，例如 `layers=-1,61`
  pub fn list<T: FromStr>(&self, key: &str) -> Result<Option<Vec<T>>, CfgError> {
    let Some(value) = self.get(key) else {
      return Ok(None);
    };
    value
      .split(',')
      .filter(|item| !item.is_empty())
      .map(|item| item.parse().map_err(|_| self.invalid(key, value)))
      .collect::<Result<Vec<T>, _>>()
      .map(Some)
  }
}

fn canonical_name(name: &str) -> &str {
  match name {
    "conv" | "convolutional" => "convolutional",
    "max" | "maxpool" => "maxpool",
    "network" | "net" => "net",
    other => other,
  }
}

/// 解析 `.cfg` 文本，返回按出现顺序排列的段落，第一个段落必须是 `[net]`
pub fn parse_cfg(text: &str) -> Result<Vec<Section>, CfgError> {
  let mut sections: Vec<Section> = Vec::new();

  for (index, raw) in text.lines().enumerate() {
    let line = index + 1;
    // Darknet 会去掉行内所有空白字符
    let stripped: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if stripped.is_empty() || stripped.starts_with('#') || stripped.starts_with(';') {
      continue;
    }

    if let Some(name) = stripped
      .strip_prefix('[')
      .and_then(|rest| rest.strip_suffix(']'))
    {
      sections.push(Section::new(name, line));
      continue;
    }

    let Some((key, value)) = stripped.split_once('=') else {
      return Err(CfgError::Malformed {
        line,
        text: raw.to_string(),
      });
    };
    let section = sections
      .last_mut()
      .ok_or(CfgError::OptionOutsideSection { line })?;
    section.options.insert(key.to_string(), value.to_string());
  }

  match sections.first() {
    None => return Err(CfgError::Empty),
    Some(first) if first.name() != "net" => {
      return Err(CfgError::MissingNet(first.name().to_string()));
    }
    Some(_) => {}
  }

  debug!("解析到 {} 个配置段落", sections.len());
  Ok(sections)
}
