// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/model.rs - 模型
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

use std::sync::Arc;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;

pub trait Model {
  type Error;

  fn infer(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<Vec<Detection>, Self::Error>;
}

impl<M: Model + ?Sized> Model for &M {
  type Error = M::Error;

  fn infer(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<Vec<Detection>, Self::Error> {
    (**self).infer(image, thresholds)
  }
}

impl<M: Model + ?Sized> Model for Box<M> {
  type Error = M::Error;

  fn infer(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<Vec<Detection>, Self::Error> {
    (**self).infer(image, thresholds)
  }
}

impl<M: Model + ?Sized> Model for Arc<M> {
  type Error = M::Error;

  fn infer(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<Vec<Detection>, Self::Error> {
    (**self).infer(image, thresholds)
  }
}

/// 像素坐标下的轴对齐边框，左上角为原点，序列化为 `[x, y, w, h]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "[i32; 4]", into = "[i32; 4]")]
pub struct BBox {
  pub x: i32,
  pub y: i32,
  pub width: i32,
  pub height: i32,
}

impl From<[i32; 4]> for BBox {
  fn from([x, y, width, height]: [i32; 4]) -> Self {
    BBox::new(x, y, width, height)
  }
}

impl From<BBox> for [i32; 4] {
  fn from(bbox: BBox) -> Self {
    [bbox.x, bbox.y, bbox.width, bbox.height]
  }
}

impl BBox {
  pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      x,
      y,
      width,
      height,
    }
  }

  /// 由原图尺寸下的中心点与宽高换算左上角坐标，截断方式与 `int()` 一致
  pub fn from_center(cx: f32, cy: f32, width: f32, height: f32) -> Self {
    let cx = cx as i32;
    let cy = cy as i32;
    let w = width as i32;
    let h = height as i32;
    let x = (cx as f32 - w as f32 / 2.0) as i32;
    let y = (cy as f32 - h as f32 / 2.0) as i32;
    Self::new(x, y, w, h)
  }

  pub fn right(&self) -> i32 {
    self.x.saturating_add(self.width)
  }

  pub fn bottom(&self) -> i32 {
    self.y.saturating_add(self.height)
  }

  pub fn area(&self) -> f32 {
    self.width.max(0) as f32 * self.height.max(0) as f32
  }

  /// 将边框限制在 `image_width x image_height` 的图像内。
  ///
  /// 左上角裁到非负，右下角裁到图像边缘，宽高按裁剪后的边重新计算，
  /// 且至少为 1 像素。
  pub fn clamp_to(&self, image_width: u32, image_height: u32) -> Self {
    let max_x = (image_width.max(1) - 1).min(i32::MAX as u32) as i32;
    let max_y = (image_height.max(1) - 1).min(i32::MAX as u32) as i32;

    let x0 = self.x.clamp(0, max_x);
    let y0 = self.y.clamp(0, max_y);
    let x1 = self.right().min(max_x + 1);
    let y1 = self.bottom().min(max_y + 1);

    Self::new(x0, y0, (x1 - x0).max(1), (y1 - y0).max(1))
  }
}

/// 置信度过滤后、NMS 之前的候选框
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Proposal {
  pub class_id: usize,
  pub confidence: f32,
  pub bbox: BBox,
}

/// 最终检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  #[serde(rename = "class")]
  pub class_name: String,
  #[serde(skip)]
  pub class_id: usize,
  pub confidence: f32,
  #[serde(rename = "box")]
  pub bbox: BBox,
}

/// NMS 抑制范围
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NmsMode {
  /// 只在同一类别内相互抑制
  #[default]
  Grouped,
  /// 不区分类别，全局一次抑制
  Global,
}

impl std::str::FromStr for NmsMode {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_lowercase().as_str() {
      "grouped" | "class" => Ok(NmsMode::Grouped),
      "global" => Ok(NmsMode::Global),
      other => Err(format!("未知的 NMS 模式: {}", other)),
    }
  }
}

/// 阈值必须位于开区间 (0, 1)
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum ThresholdError {
  #[error("置信度阈值必须在 (0, 1) 之间, 实际为 {0}")]
  Confidence(f32),
  #[error("NMS 阈值必须在 (0, 1) 之间, 实际为 {0}")]
  Nms(f32),
}

fn in_open_unit_interval(value: f32) -> bool {
  value > 0.0 && value < 1.0
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
  pub confidence: f32,
  pub nms: f32,
  pub nms_mode: NmsMode,
}

impl Default for Thresholds {
  fn default() -> Self {
    Self {
      confidence: DEFAULT_CONFIDENCE_THRESHOLD,
      nms: DEFAULT_NMS_THRESHOLD,
      nms_mode: NmsMode::default(),
    }
  }
}

impl Thresholds {
  pub fn with_confidence(mut self, confidence: f32) -> Self {
    self.confidence = confidence;
    self
  }

  pub fn with_nms(mut self, nms: f32) -> Self {
    self.nms = nms;
    self
  }

  pub fn with_nms_mode(mut self, nms_mode: NmsMode) -> Self {
    self.nms_mode = nms_mode;
    self
  }

  pub fn validate(&self) -> Result<(), ThresholdError> {
    if !in_open_unit_interval(self.confidence) {
      return Err(ThresholdError::Confidence(self.confidence));
    }
    if !in_open_unit_interval(self.nms) {
      return Err(ThresholdError::Nms(self.nms));
    }
    Ok(())
  }
}

mod config;
mod labels;
mod nms;
mod yolo;

pub use self::config::{InputConfig, ModelConfig, ModelConfigError, OutputConfig};
pub use self::labels::{LabelError, LabelSet};
pub use self::nms::{iou, non_max_suppression};
pub use self::yolo::{RawOutput, YoloDetector, YoloDetectorBuilder, YoloError};
