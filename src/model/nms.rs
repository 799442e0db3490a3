// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use crate::model::{BBox, NmsMode, Proposal};

/// 计算两个边框的 IoU
pub fn iou(a: &BBox, b: &BBox) -> f32 {
  let x1 = a.x.max(b.x);
  let y1 = a.y.max(b.y);
  let x2 = a.right().min(b.right());
  let y2 = a.bottom().min(b.bottom());

  let intersection = (x2 - x1).max(0) as f32 * (y2 - y1).max(0) as f32;
  let union = a.area() + b.area() - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}

/// 贪心 NMS。
///
/// 按置信度降序（稳定排序，置信度相同时保持候选框原有顺序）依次选取，
/// 与已选框 IoU ≥ `threshold` 的候选框被抑制。`NmsMode::Grouped` 只比较同类框。
/// 返回结果按选取顺序排列。
pub fn non_max_suppression(
  mut proposals: Vec<Proposal>,
  threshold: f32,
  mode: NmsMode,
) -> Vec<Proposal> {
  proposals.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Proposal> = Vec::with_capacity(proposals.len());

  for candidate in proposals {
    let suppressed = kept.iter().any(|selected| {
      let comparable = match mode {
        NmsMode::Grouped => selected.class_id == candidate.class_id,
        NmsMode::Global => true,
      };
      comparable && iou(&selected.bbox, &candidate.bbox) >= threshold
    });

    if !suppressed {
      kept.push(candidate);
    }
  }

  kept
}
