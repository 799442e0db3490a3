// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/model/config.rs - 网络描述文件
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

//! 网络描述（TOML），例如：
//!
//! ```toml
//! [input]
//! width = 416
//! height = 416
//! scale = 0.00392156862745098
//! channel_order = "rgb"
//!
//! [output]
//! layers = ["yolo_139", "yolo_150", "yolo_161"]
//! ```
//!
//! `output.layers` 为空时使用模型中所有未被其他节点消费的输出。

use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::frame::ChannelOrder;

const YOLO_INPUT_W: u32 = 416;
const YOLO_INPUT_H: u32 = 416;
const YOLO_INPUT_SCALE: f32 = 1.0 / 255.0;

#[derive(Error, Debug)]
pub enum ModelConfigError {
  #[error("网络描述读取错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("网络描述解析错误: {0}")]
  ParseError(#[from] toml::de::Error),
  #[error("网络描述无效: {0}")]
  Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InputConfig {
  pub width: u32,
  pub height: u32,
  pub scale: f32,
  pub channel_order: ChannelOrder,
}

impl Default for InputConfig {
  fn default() -> Self {
    Self {
      width: YOLO_INPUT_W,
      height: YOLO_INPUT_H,
      scale: YOLO_INPUT_SCALE,
      channel_order: ChannelOrder::Rgb,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
  pub layers: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ModelConfig {
  pub input: InputConfig,
  pub output: OutputConfig,
}

impl ModelConfig {
  pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ModelConfigError> {
    let path = path.as_ref();
    info!("加载网络描述: {}", path.display());
    let text = std::fs::read_to_string(path)?;
    let config: ModelConfig = text.parse()?;
    debug!("网络描述: {:?}", config);
    Ok(config)
  }

  fn validate(&self) -> Result<(), ModelConfigError> {
    if self.input.width == 0 || self.input.height == 0 {
      return Err(ModelConfigError::Invalid(format!(
        "输入尺寸必须非零, 实际为 {}x{}",
        self.input.width, self.input.height
      )));
    }
    if !(self.input.scale.is_finite() && self.input.scale > 0.0) {
      return Err(ModelConfigError::Invalid(format!(
        "归一化系数必须为正数, 实际为 {}",
        self.input.scale
      )));
    }
    Ok(())
  }
}

impl std::str::FromStr for ModelConfig {
  type Err = ModelConfigError;

  fn from_str(text: &str) -> Result<Self, Self::Err> {
    let config: ModelConfig = toml::from_str(text)?;
    config.validate()?;
    Ok(config)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn empty_description_uses_yolo_defaults() {
    let config: ModelConfig = "".parse().unwrap();
    assert_eq!(config.input.width, 416);
    assert_eq!(config.input.height, 416);
    assert_eq!(config.input.channel_order, ChannelOrder::Rgb);
    assert!(config.output.layers.is_empty());
  }

  #[test]
  fn parses_explicit_output_layers_and_bgr() {
    let config: ModelConfig = r#"
      [input]
      width = 320
      height = 320
      channel_order = "bgr"

      [output]
      layers = ["yolo_82", "yolo_94"]
    "#
    .parse()
    .unwrap();

    assert_eq!(config.input.width, 320);
    assert_eq!(config.input.channel_order, ChannelOrder::Bgr);
    assert_eq!(config.output.layers, vec!["yolo_82", "yolo_94"]);
  }

  #[test]
  fn rejects_zero_input_size_and_unknown_keys() {
    assert!(matches!(
      "[input]\nwidth = 0".parse::<ModelConfig>(),
      Err(ModelConfigError::Invalid(_))
    ));
    assert!(matches!(
      "[input]\nanchors = 3".parse::<ModelConfig>(),
      Err(ModelConfigError::ParseError(_))
    ));
  }
}
