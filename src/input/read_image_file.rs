// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/input/read_image_file.rs - 图像文件输入
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

use std::io::Cursor;
use std::path::{Path, PathBuf};

use image::{ImageReader, RgbImage};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, decode_url_path};

/// 允许上传的图像扩展名
pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

#[derive(Error, Debug)]
pub enum ImageFileInputError {
  #[error("URI scheme mismatch")]
  SchemaMismatch,
  #[error("File type not allowed: {0}")]
  FileTypeNotAllowed(String),
  #[error("I/O error: {0}")]
  IoError(#[from] std::io::Error),
  #[error("Image loading error: {0}")]
  ImageLoadError(#[from] image::ImageError),
  #[error("Image has no pixels: {0}x{1}")]
  EmptyImage(u32, u32),
}

/// 按扩展名（不区分大小写）判断文件是否允许上传
pub fn is_allowed_file(filename: &str) -> bool {
  filename
    .rsplit_once('.')
    .map(|(_, ext)| {
      let ext = ext.to_ascii_lowercase();
      ALLOWED_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}

/// 已解码的上传图像
pub struct ImageFileInput {
  path: PathBuf,
  image: RgbImage,
}

impl FromUrlWithScheme for ImageFileInput {
  const SCHEME: &'static str = "image";
}

impl FromUrl for ImageFileInput {
  type Error = ImageFileInputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      error!(
        "URI scheme mismatch: expected '{}', found '{}'",
        Self::SCHEME,
        url.scheme()
      );
      return Err(ImageFileInputError::SchemaMismatch);
    }

    Self::open(decode_url_path(url))
  }
}

impl ImageFileInput {
  /// 打开并解码图像文件，扩展名不在白名单内或无法解码时返回输入错误
  pub fn open(path: impl AsRef<Path>) -> Result<Self, ImageFileInputError> {
    let path = path.as_ref();
    let name = path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default();

    if !is_allowed_file(&name) {
      return Err(ImageFileInputError::FileTypeNotAllowed(name));
    }

    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .to_rgb8();

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(ImageFileInputError::EmptyImage(width, height));
    }
    debug!("读取图像 {}: {}x{}", path.display(), width, height);

    Ok(ImageFileInput {
      path: path.to_path_buf(),
      image,
    })
  }

  /// 从上传内容解码，`file_name` 只用于扩展名检查与生成结果文件名
  pub fn from_bytes(file_name: &str, bytes: &[u8]) -> Result<Self, ImageFileInputError> {
    if !is_allowed_file(file_name) {
      return Err(ImageFileInputError::FileTypeNotAllowed(file_name.to_string()));
    }

    let image = ImageReader::new(Cursor::new(bytes))
      .with_guessed_format()?
      .decode()?
      .to_rgb8();

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(ImageFileInputError::EmptyImage(width, height));
    }
    debug!("解码上传图像 {} ({} 字节): {}x{}", file_name, bytes.len(), width, height);

    Ok(ImageFileInput {
      path: PathBuf::from(file_name),
      image,
    })
  }

  /// 原始文件名（不含目录）
  pub fn file_name(&self) -> String {
    self
      .path
      .file_name()
      .map(|name| name.to_string_lossy().into_owned())
      .unwrap_or_default()
  }

  pub fn image(&self) -> &RgbImage {
    &self.image
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}
