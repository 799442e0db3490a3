// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/frame.rs - NCHW 输入张量定义
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

use image::{
  RgbImage,
  imageops::{self, FilterType},
};
use serde::Deserialize;

const RGB_CHANNELS: usize = 3;

/// 网络期望的输入通道顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelOrder {
  #[default]
  Rgb,
  Bgr,
}

/// 批大小为 1 的 NCHW 浮点张量，数据按 `[1, 3, H, W]` 排列
#[derive(Debug, Clone)]
pub struct NchwBlob {
  width: usize,
  height: usize,
  data: Box<[f32]>,
}

impl NchwBlob {
  /// 将图像缩放到网络输入尺寸（不裁剪、不保持比例），并乘以 `scale` 归一化
  pub fn from_image(
    image: &RgbImage,
    width: u32,
    height: u32,
    scale: f32,
    order: ChannelOrder,
  ) -> Self {
    let resized = imageops::resize(image, width, height, FilterType::Triangle);

    let plane_size = (width as usize) * (height as usize);
    let mut data = vec![0.0f32; plane_size * RGB_CHANNELS];

    for (x, y, pixel) in resized.enumerate_pixels() {
      let idx = (y as usize) * (width as usize) + (x as usize);
      for c in 0..RGB_CHANNELS {
        let src = match order {
          ChannelOrder::Rgb => c,
          ChannelOrder::Bgr => RGB_CHANNELS - 1 - c,
        };
        data[c * plane_size + idx] = pixel[src] as f32 * scale;
      }
    }

    Self {
      width: width as usize,
      height: height as usize,
      data: data.into_boxed_slice(),
    }
  }

  pub fn shape(&self) -> [usize; 4] {
    [1, RGB_CHANNELS, self.height, self.width]
  }

  pub fn as_nchw(&self) -> &[f32] {
    &self.data
  }

  pub fn into_raw(self) -> Vec<f32> {
    self.data.into_vec()
  }
}
