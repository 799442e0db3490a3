// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/output.rs - 标注输出定义
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

use std::path::{Path, PathBuf};

use image::RgbImage;
use uuid::Uuid;

use crate::model::Detection;

/// 标注结果。标注失败不是错误，调用方仍可返回检测结果。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Annotation {
  Written(PathBuf),
  Skipped(String),
}

impl Annotation {
  pub fn path(&self) -> Option<&Path> {
    match self {
      Annotation::Written(path) => Some(path),
      Annotation::Skipped(_) => None,
    }
  }
}

pub trait Render {
  fn render(&self, image: &RgbImage, output_path: &Path, detections: &[Detection]) -> Annotation;
}

/// 不绘制任何内容的输出
#[derive(Debug, Default, Clone, Copy)]
pub struct NoRender;

impl Render for NoRender {
  fn render(&self, _image: &RgbImage, _output_path: &Path, _detections: &[Detection]) -> Annotation {
    Annotation::Skipped("标注输出已禁用".to_string())
  }
}

impl<R: Render + ?Sized> Render for Box<R> {
  fn render(&self, image: &RgbImage, output_path: &Path, detections: &[Detection]) -> Annotation {
    (**self).render(image, output_path, detections)
  }
}

/// 清理上传文件名：只保留 ASCII 字母数字与 `._-`，去掉开头的点
pub fn sanitize_file_name(name: &str) -> String {
  let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
  let cleaned: String = base
    .chars()
    .map(|c| {
      if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
        c
      } else {
        '_'
      }
    })
    .collect();
  let cleaned = cleaned.trim_start_matches('.');

  if cleaned.is_empty() {
    "upload".to_string()
  } else {
    cleaned.to_string()
  }
}

/// 每个请求唯一的标注文件名 `result_<uuid>_<原文件名>`
pub fn result_file_name(original: &str) -> String {
  format!(
    "result_{}_{}",
    Uuid::new_v4(),
    sanitize_file_name(original)
  )
}

#[cfg(feature = "save_image_file")]
pub mod draw;

#[cfg(feature = "save_image_file")]
mod save_image_file;
#[cfg(feature = "save_image_file")]
pub use self::save_image_file::{SaveImageFileError, SaveImageFileOutput};
