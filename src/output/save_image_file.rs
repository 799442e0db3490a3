// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像文件
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

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  model::Detection,
  output::{Annotation, Render, draw::Draw},
};

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 绘制检测结果并写入图像文件
#[derive(Default)]
pub struct SaveImageFileOutput {
  draw: Draw,
}

impl SaveImageFileOutput {
  /// 从磁盘重新读取源图像再标注；读不到源图像时跳过
  pub fn annotate_file(
    &self,
    source: &Path,
    output_path: &Path,
    detections: &[Detection],
  ) -> Annotation {
    let image = match ImageReader::open(source)
      .map_err(SaveImageFileError::from)
      .and_then(|reader| reader.with_guessed_format().map_err(SaveImageFileError::from))
      .and_then(|reader| reader.decode().map_err(SaveImageFileError::from))
    {
      Ok(image) => image.to_rgb8(),
      Err(e) => {
        warn!("无法读取待标注图像 {}: {}", source.display(), e);
        return Annotation::Skipped(format!("无法读取源图像: {}", e));
      }
    };

    self.render(&image, output_path, detections)
  }

  fn save_image(&self, image: &RgbImage, output_path: &Path) -> Result<(), SaveImageFileError> {
    if let Some(parent) = output_path.parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }

    image.save(output_path)?;
    info!("保存标注图像到文件: {}", output_path.display());

    Ok(())
  }
}

impl Render for SaveImageFileOutput {
  fn render(&self, image: &RgbImage, output_path: &Path, detections: &[Detection]) -> Annotation {
    let mut canvas = image.clone();
    self.draw.draw_detections_on_image(&mut canvas, detections);

    match self.save_image(&canvas, output_path) {
      Ok(()) => Annotation::Written(output_path.to_path_buf()),
      Err(e) => {
        warn!("写入标注图像 {} 失败: {}", output_path.display(), e);
        Annotation::Skipped(format!("无法写入标注图像: {}", e))
      }
    }
  }
}
