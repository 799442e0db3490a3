// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/mapping.rs - 检测结果到库存类别的映射
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

use std::collections::{BTreeSet, HashMap};

use serde::Serialize;
use tracing::{debug, warn};

use crate::{
  model::Detection,
  store::{CategoryId, ExistingItem, ItemStore, MappingSnapshot, MappingStore, StoreError},
};

/// 每个已映射的检测类别对应一条建议
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategorySuggestion {
  pub detected_object: String,
  pub suggested_category: String,
  pub category_id: CategoryId,
  /// 该类别第一次出现时的置信度
  pub confidence: f32,
  /// 该类别在本次检测中出现的总次数
  pub count: usize,
  pub existing_items_in_category: Vec<ExistingItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MappingStatus {
  Complete,
  /// 存储不可用，建议与未映射列表均为空
  Degraded { reason: String },
}

impl MappingStatus {
  pub fn is_complete(&self) -> bool {
    matches!(self, MappingStatus::Complete)
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MappingOutcome {
  pub suggestions: Vec<CategorySuggestion>,
  pub unmapped_objects: Vec<String>,
  pub status: MappingStatus,
}

impl MappingOutcome {
  pub fn degraded(reason: impl Into<String>) -> Self {
    Self {
      suggestions: Vec::new(),
      unmapped_objects: Vec::new(),
      status: MappingStatus::Degraded {
        reason: reason.into(),
      },
    }
  }

  pub fn is_degraded(&self) -> bool {
    !self.status.is_complete()
  }
}

/// 按首次出现顺序统计每个类别：`(类别名, 首次置信度, 出现次数)`
fn tally(detections: &[Detection]) -> Vec<(&str, f32, usize)> {
  let mut order: Vec<(&str, f32, usize)> = Vec::new();
  let mut index: HashMap<&str, usize> = HashMap::new();

  for detection in detections {
    let name = detection.class_name.as_str();
    match index.get(name) {
      Some(&i) => order[i].2 += 1,
      None => {
        index.insert(name, order.len());
        order.push((name, detection.confidence, 1));
      }
    }
  }
  order
}

fn reconcile<I: ItemStore>(
  detections: &[Detection],
  snapshot: &MappingSnapshot,
  items: &I,
) -> Result<MappingOutcome, StoreError> {
  let classes = tally(detections);

  let category_ids: BTreeSet<CategoryId> = classes
    .iter()
    .filter_map(|(name, _, _)| snapshot.get(*name).map(|c| c.category_id))
    .collect();

  let existing = if category_ids.is_empty() {
    HashMap::new()
  } else {
    debug!("批量查询 {} 个类别下的物品", category_ids.len());
    items.items_by_category(&category_ids)?
  };

  let mut suggestions = Vec::new();
  let mut unmapped_objects = Vec::new();
  for (name, confidence, count) in classes {
    match snapshot.get(name) {
      Some(category) => suggestions.push(CategorySuggestion {
        detected_object: name.to_string(),
        suggested_category: category.category_name.clone(),
        category_id: category.category_id,
        confidence,
        count,
        // 多个对象映射到同一类别时各自持有一份物品列表
        existing_items_in_category: existing
          .get(&category.category_id)
          .cloned()
          .unwrap_or_default(),
      }),
      None => unmapped_objects.push(name.to_string()),
    }
  }

  Ok(MappingOutcome {
    suggestions,
    unmapped_objects,
    status: MappingStatus::Complete,
  })
}

/// 基于已读取的映射快照完成映射；物品查询失败时返回降级结果
pub fn map_detections<I: ItemStore>(
  detections: &[Detection],
  snapshot: &MappingSnapshot,
  items: &I,
) -> MappingOutcome {
  reconcile(detections, snapshot, items).unwrap_or_else(|e| {
    warn!("查询类别物品失败, 跳过类别建议: {}", e);
    MappingOutcome::degraded(e.to_string())
  })
}

/// 类别映射器：每次调用读取一次映射快照，再做一次批量物品查询
pub struct CategoryMapper<M, I> {
  mappings: M,
  items: I,
}

impl<M: MappingStore, I: ItemStore> CategoryMapper<M, I> {
  pub fn new(mappings: M, items: I) -> Self {
    Self { mappings, items }
  }

  pub fn map(&self, detections: &[Detection]) -> MappingOutcome {
    let snapshot = match self.mappings.snapshot() {
      Ok(snapshot) => snapshot,
      Err(e) => {
        warn!("读取映射表失败, 跳过类别建议: {}", e);
        return MappingOutcome::degraded(e.to_string());
      }
    };
    map_detections(detections, &snapshot, &self.items)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BBox;
  use crate::store::CategoryRef;
  use std::cell::RefCell;

  fn detection(class_name: &str, confidence: f32) -> Detection {
    Detection {
      class_name: class_name.to_string(),
      class_id: 0,
      confidence,
      bbox: BBox::new(0, 0, 10, 10),
    }
  }

  fn snapshot() -> MappingSnapshot {
    MappingSnapshot::from([(
      "bottle".to_string(),
      CategoryRef {
        category_name: "Beverages".to_string(),
        category_id: 3,
      },
    )])
  }

  fn water() -> ExistingItem {
    ExistingItem {
      item_id: 1,
      name: "Water".to_string(),
      quantity: 5,
    }
  }

  /// 记录每次批量查询的参数
  #[derive(Default)]
  struct RecordingItems {
    calls: RefCell<Vec<BTreeSet<CategoryId>>>,
    fail: bool,
  }

  impl ItemStore for RecordingItems {
    fn items_by_category(
      &self,
      category_ids: &BTreeSet<CategoryId>,
    ) -> Result<HashMap<CategoryId, Vec<ExistingItem>>, StoreError> {
      self.calls.borrow_mut().push(category_ids.clone());
      if self.fail {
        return Err(StoreError::Unavailable("connection refused".to_string()));
      }
      Ok(HashMap::from([(3, vec![water()])]))
    }
  }

  struct BrokenMappings;

  impl MappingStore for BrokenMappings {
    fn snapshot(&self) -> Result<MappingSnapshot, StoreError> {
      Err(StoreError::Unavailable("connection refused".to_string()))
    }

    fn upsert(&self, _object_name: &str, _category_id: CategoryId) -> Result<(), StoreError> {
      Err(StoreError::Unavailable("connection refused".to_string()))
    }
  }

  #[test]
  fn bottle_and_fork_scenario() {
    let items = RecordingItems::default();
    let outcome = map_detections(
      &[
        detection("bottle", 0.9),
        detection("bottle", 0.7),
        detection("fork", 0.6),
      ],
      &snapshot(),
      &items,
    );

    assert_eq!(outcome.status, MappingStatus::Complete);
    assert_eq!(
      outcome.suggestions,
      vec![CategorySuggestion {
        detected_object: "bottle".to_string(),
        suggested_category: "Beverages".to_string(),
        category_id: 3,
        confidence: 0.9,
        count: 2,
        existing_items_in_category: vec![water()],
      }]
    );
    assert_eq!(outcome.unmapped_objects, vec!["fork".to_string()]);
    assert_eq!(*items.calls.borrow(), vec![BTreeSet::from([3])]);
  }

  #[test]
  fn unmapped_names_are_deduplicated() {
    let items = RecordingItems::default();
    let outcome = map_detections(
      &[
        detection("chair", 0.8),
        detection("fork", 0.7),
        detection("chair", 0.6),
      ],
      &snapshot(),
      &items,
    );
    assert!(outcome.suggestions.is_empty());
    assert_eq!(outcome.unmapped_objects, vec!["chair", "fork"]);
    // 没有任何已映射类别时不查询物品
    assert!(items.calls.borrow().is_empty());
  }

  #[test]
  fn first_occurrence_confidence_wins_even_if_lower() {
    let items = RecordingItems::default();
    let outcome = map_detections(
      &[detection("bottle", 0.55), detection("bottle", 0.95)],
      &snapshot(),
      &items,
    );
    assert_eq!(outcome.suggestions[0].confidence, 0.55);
    assert_eq!(outcome.suggestions[0].count, 2);
  }

  #[test]
  fn empty_detection_list_is_complete_and_empty() {
    let items = RecordingItems::default();
    let outcome = map_detections(&[], &snapshot(), &items);
    assert_eq!(outcome.status, MappingStatus::Complete);
    assert!(outcome.suggestions.is_empty());
    assert!(outcome.unmapped_objects.is_empty());
  }

  #[test]
  fn items_lookup_failure_degrades() {
    let items = RecordingItems {
      fail: true,
      ..Default::default()
    };
    let outcome = map_detections(&[detection("bottle", 0.9)], &snapshot(), &items);
    assert!(outcome.is_degraded());
    assert!(outcome.suggestions.is_empty());
    assert!(outcome.unmapped_objects.is_empty());
  }

  #[test]
  fn mapping_store_failure_degrades_without_lookup() {
    let items = RecordingItems::default();
    let mapper = CategoryMapper::new(BrokenMappings, &items);
    let outcome = mapper.map(&[detection("bottle", 0.9), detection("fork", 0.6)]);

    assert!(outcome.is_degraded());
    assert!(outcome.suggestions.is_empty());
    assert!(outcome.unmapped_objects.is_empty());
    assert!(items.calls.borrow().is_empty());
  }

  #[test]
  fn degraded_status_serializes_with_reason() {
    let json = serde_json::to_value(MappingOutcome::degraded("down").status).unwrap();
    assert_eq!(json, serde_json::json!({"state": "degraded", "reason": "down"}));
  }
}
