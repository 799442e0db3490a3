// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
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

use ab_glyph::{FontArc, PxScale};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::model::{BBox, Detection};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 18.0;
const LABEL_VERTICAL_PADDING: i32 = 10;
const LABEL_HORIZONTAL_PADDING: u32 = 5;
const LABEL_TEXT_OFFSET_X: i32 = 3;
const LABEL_TEXT_OFFSET_Y: i32 = 5;
const LABEL_TEXT_COLOR: [u8; 3] = [0, 0, 0]; // 黑色
const BOX_THICKNESS: u32 = 2;

/// 置信度分档，只用于着色
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfidenceTier {
  /// > 0.8，绿色
  High,
  /// > 0.6，琥珀色
  Medium,
  /// 其余，橙色
  Low,
}

impl ConfidenceTier {
  pub fn of(confidence: f32) -> Self {
    if confidence > 0.8 {
      ConfidenceTier::High
    } else if confidence > 0.6 {
      ConfidenceTier::Medium
    } else {
      ConfidenceTier::Low
    }
  }

  pub fn color(self) -> Rgb<u8> {
    match self {
      ConfidenceTier::High => Rgb([0, 255, 0]),
      ConfidenceTier::Medium => Rgb([255, 255, 0]),
      ConfidenceTier::Low => Rgb([255, 165, 0]),
    }
  }
}

/// 标签背景矩形 `(x, y, width, height)`：默认在边框上方，放不下时移到边框顶边下方
pub fn label_rect(x1: i32, y1: i32, text_width: u32, text_height: u32) -> (i32, i32, u32, u32) {
  let mut rect_y = y1 - text_height as i32 - LABEL_VERTICAL_PADDING;
  if rect_y < 0 {
    rect_y = y1 + LABEL_VERTICAL_PADDING;
  }
  (
    x1,
    rect_y,
    text_width + LABEL_HORIZONTAL_PADDING,
    text_height + LABEL_VERTICAL_PADDING as u32,
  )
}

/// 将边框裁剪到图像内，返回 `(x1, y1, x2, y2)`（闭区间），完全在图像外时返回 `None`
fn clip_to_image(bbox: &BBox, image: &RgbImage) -> Option<(i32, i32, i32, i32)> {
  let max_x = image.width() as i32 - 1;
  let max_y = image.height() as i32 - 1;

  let x1 = bbox.x.max(0);
  let y1 = bbox.y.max(0);
  let x2 = bbox.right().min(max_x);
  let y2 = bbox.bottom().min(max_y);

  if x1 > x2 || y1 > y2 {
    return None;
  }
  Some((x1, y1, x2, y2))
}

pub struct Draw {
  font: FontArc,
  scale: PxScale,
  text_color: Rgb<u8>,
}

impl Default for Draw {
  fn default() -> Self {
    let font_data: &'static [u8] = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    Self {
      font,
      scale: PxScale::from(LABEL_FONT_SIZE),
      text_color: Rgb(LABEL_TEXT_COLOR),
    }
  }
}

impl Draw {
  /// 在图像上绘制所有检测框和标签
  pub fn draw_detections_on_image(&self, image: &mut RgbImage, detections: &[Detection]) {
    for detection in detections {
      self.draw_bbox_with_label(image, detection);
    }
  }

  fn draw_bbox_with_label(&self, image: &mut RgbImage, detection: &Detection) {
    let Some((x1, y1, x2, y2)) = clip_to_image(&detection.bbox, image) else {
      return;
    };
    let color = ConfidenceTier::of(detection.confidence).color();

    let width = (x2 - x1 + 1) as u32;
    let height = (y2 - y1 + 1) as u32;
    for inset in 0..BOX_THICKNESS {
      if width <= 2 * inset || height <= 2 * inset {
        break;
      }
      let rect = Rect::at(x1 + inset as i32, y1 + inset as i32)
        .of_size(width - 2 * inset, height - 2 * inset);
      draw_hollow_rect_mut(image, rect, color);
    }

    let label = format!("{} {:.2}", detection.class_name, detection.confidence);
    let (text_width, text_height) = text_size(self.scale, &self.font, &label);
    let (rect_x, rect_y, rect_width, rect_height) = label_rect(x1, y1, text_width, text_height);

    draw_filled_rect_mut(
      image,
      Rect::at(rect_x, rect_y).of_size(rect_width, rect_height),
      color,
    );
    draw_text_mut(
      image,
      self.text_color,
      rect_x + LABEL_TEXT_OFFSET_X,
      rect_y + LABEL_TEXT_OFFSET_Y,
      self.scale,
      &self.font,
      &label,
    );
  }
}
