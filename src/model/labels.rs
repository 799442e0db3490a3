// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/model/labels.rs - 类别列表
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

use std::path::Path;

use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum LabelError {
  #[error("类别列表读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("类别列表为空")]
  Empty,
}

/// 按类别索引排列的类别名称，每行一个
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelSet {
  names: Box<[String]>,
}

impl LabelSet {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, LabelError> {
    let path = path.as_ref();
    info!("加载类别列表: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    text.parse()
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn name(&self, class_id: usize) -> Option<&str> {
    self.names.get(class_id).map(String::as_str)
  }
}

impl std::str::FromStr for LabelSet {
  type Err = LabelError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let mut names: Vec<String> = text.lines().map(|line| line.trim().to_string()).collect();
    // 中间的空行保留以免打乱类别索引，只去掉结尾的空行
    while names.last().is_some_and(|name| name.is_empty()) {
      names.pop();
    }

    if names.is_empty() {
      return Err(LabelError::Empty);
    }

    Ok(Self {
      names: names.into_boxed_slice(),
    })
  }
}

impl<S: Into<String>> FromIterator<S> for LabelSet {
  fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
    Self {
      names: iter.into_iter().map(Into::into).collect(),
    }
  }
}
