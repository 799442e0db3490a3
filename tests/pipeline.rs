// 该文件是 Cangku （仓库识物） 项目的一部分。
// tests/pipeline.rs - 识物流程集成测试
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

#![cfg(feature = "json_store")]

use std::path::Path;

use image::{Rgb, RgbImage};

use cangku::{
  mapping::{CategoryMapper, MappingStatus},
  model::{Detection, LabelSet, Model, NmsMode, RawOutput, Thresholds, YoloDetector, YoloError},
  output::NoRender,
  store::{JsonFileStore, MappingStore},
  task::DetectionTask,
};

const INVENTORY: &str = r#"{
  "categories": [
    {"category_id": 3, "category_name": "Beverages"},
    {"category_id": 5, "category_name": "Kitchenware"}
  ],
  "object_mappings": [
    {"object_name": "bottle", "category_id": 3}
  ],
  "items": [
    {"item_id": 1, "name": "Water", "category_id": 3, "quantity": 5},
    {"item_id": 2, "name": "Cutlery set", "category_id": 5, "quantity": 2}
  ]
}"#;

fn labels() -> LabelSet {
  ["bottle", "fork", "chair"].into_iter().collect()
}

fn row(cx: f32, cy: f32, w: f32, h: f32, scores: [f32; 3]) -> Vec<f32> {
  let mut row = vec![cx, cy, w, h, 1.0];
  row.extend_from_slice(&scores);
  row
}

/// 用固定的原始输出模拟一次前向推理
struct ReplayModel {
  layers: Vec<Vec<f32>>,
  labels: LabelSet,
}

impl ReplayModel {
  fn shelf() -> Self {
    let first = [
      row(0.25, 0.5, 0.2, 0.4, [0.9, 0.05, 0.0]),
      // 与第一个 bottle 高度重叠，应被抑制
      row(0.26, 0.5, 0.2, 0.4, [0.85, 0.0, 0.0]),
      row(0.75, 0.5, 0.2, 0.4, [0.7, 0.1, 0.0]),
    ]
    .concat();
    let second = [
      row(0.5, 0.9, 0.1, 0.1, [0.0, 0.6, 0.0]),
      row(0.1, 0.1, 0.1, 0.1, [0.0, 0.0, 0.3]),
    ]
    .concat();

    Self {
      layers: vec![first, second],
      labels: labels(),
    }
  }
}

impl Model for ReplayModel {
  type Error = YoloError;

  fn infer(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<Vec<Detection>, Self::Error> {
    thresholds.validate().map_err(YoloError::InvalidThreshold)?;
    let outputs: Vec<RawOutput<'_>> = self
      .layers
      .iter()
      .map(|data| RawOutput { row_len: 8, data })
      .collect();
    YoloDetector::postprocess(
      &outputs,
      &self.labels,
      image.width(),
      image.height(),
      thresholds,
    )
  }
}

fn write_inventory(dir: &Path) -> JsonFileStore {
  let path = dir.join("inventory.json");
  std::fs::write(&path, INVENTORY).unwrap();
  JsonFileStore::new(path)
}

fn shelf_png(dir: &Path) -> std::path::PathBuf {
  let path = dir.join("shelf.png");
  RgbImage::from_pixel(400, 200, Rgb([240, 240, 240]))
    .save(&path)
    .unwrap();
  path
}

#[test]
fn shelf_photo_produces_detections_and_suggestions() {
  let dir = tempfile::tempdir().unwrap();
  let store = write_inventory(dir.path());
  let task = DetectionTask::new(ReplayModel::shelf(), NoRender, store, dir.path().join("results"));

  let response = task
    .process_file(shelf_png(dir.path()), Some("0.5"))
    .unwrap();

  let classes: Vec<&str> = response
    .detections
    .iter()
    .map(|d| d.class_name.as_str())
    .collect();
  assert_eq!(classes, vec!["bottle", "bottle", "fork"]);
  for detection in &response.detections {
    assert!(detection.confidence > 0.5);
    assert!(detection.bbox.x >= 0 && detection.bbox.y >= 0);
    assert!(detection.bbox.width >= 1 && detection.bbox.height >= 1);
    assert!(detection.bbox.right() <= 400 && detection.bbox.bottom() <= 200);
  }

  assert_eq!(response.category_suggestions.len(), 1);
  let bottle = &response.category_suggestions[0];
  assert_eq!(bottle.detected_object, "bottle");
  assert_eq!(bottle.suggested_category, "Beverages");
  assert_eq!(bottle.confidence, 0.9);
  assert_eq!(bottle.count, 2);
  assert_eq!(bottle.existing_items_in_category.len(), 1);
  assert_eq!(bottle.existing_items_in_category[0].name, "Water");
  assert_eq!(response.unmapped_objects, vec!["fork"]);
}

#[test]
fn new_mapping_is_used_by_the_next_request() {
  let dir = tempfile::tempdir().unwrap();
  let store = write_inventory(dir.path());
  store.upsert("fork", 5).unwrap();

  let task = DetectionTask::new(ReplayModel::shelf(), NoRender, store, dir.path().join("results"));
  let response = task.process_file(shelf_png(dir.path()), None).unwrap();

  let objects: Vec<&str> = response
    .category_suggestions
    .iter()
    .map(|s| s.detected_object.as_str())
    .collect();
  assert_eq!(objects, vec!["bottle", "fork"]);
  assert_eq!(response.category_suggestions[1].existing_items_in_category[0].name, "Cutlery set");
  assert!(response.unmapped_objects.is_empty());
}

#[test]
fn unavailable_store_keeps_detections() {
  let dir = tempfile::tempdir().unwrap();
  let store = JsonFileStore::new(dir.path().join("missing.json"));
  let task = DetectionTask::new(ReplayModel::shelf(), NoRender, store, dir.path().join("results"));

  let response = task.process_file(shelf_png(dir.path()), None).unwrap();
  assert_eq!(response.detections.len(), 3);
  assert!(response.category_suggestions.is_empty());
  assert!(response.unmapped_objects.is_empty());
  assert!(matches!(response.mapping_status, MappingStatus::Degraded { .. }));

  let json = serde_json::to_value(&response).unwrap();
  assert_eq!(json["mapping_status"]["state"], "degraded");
}

#[test]
fn global_nms_suppresses_across_classes() {
  let labels = labels();
  // 同一位置的 bottle 与 chair
  let data = [
    row(0.5, 0.5, 0.4, 0.4, [0.9, 0.0, 0.0]),
    row(0.5, 0.5, 0.4, 0.4, [0.0, 0.0, 0.8]),
  ]
  .concat();
  let outputs = [RawOutput {
    row_len: 8,
    data: &data,
  }];

  let grouped = YoloDetector::postprocess(&outputs, &labels, 100, 100, &Thresholds::default()).unwrap();
  assert_eq!(grouped.len(), 2);

  let global = YoloDetector::postprocess(
    &outputs,
    &labels,
    100,
    100,
    &Thresholds::default().with_nms_mode(NmsMode::Global),
  )
  .unwrap();
  assert_eq!(global.len(), 1);
  assert_eq!(global[0].class_name, "bottle");
}

#[test]
fn empty_detections_map_to_complete_empty_outcome() {
  let dir = tempfile::tempdir().unwrap();
  let store = write_inventory(dir.path());
  let mapper = CategoryMapper::new(&store, &store);

  let outcome = mapper.map(&[]);
  assert_eq!(outcome.status, MappingStatus::Complete);
  assert!(outcome.suggestions.is_empty());
  assert!(outcome.unmapped_objects.is_empty());
}

#[cfg(feature = "save_image_file")]
#[test]
fn annotated_image_is_written_under_output_dir() {
  use cangku::output::SaveImageFileOutput;

  let dir = tempfile::tempdir().unwrap();
  let store = write_inventory(dir.path());
  let results = dir.path().join("results");
  let task = DetectionTask::new(
    ReplayModel::shelf(),
    SaveImageFileOutput::default(),
    store,
    &results,
  );

  let response = task.process_file(shelf_png(dir.path()), None).unwrap();
  let identifier = response.annotated_image.unwrap();
  let file_name = identifier.strip_prefix("/api/images/").unwrap();
  assert!(file_name.starts_with("result_") && file_name.ends_with("_shelf.png"));

  let annotated = image::open(results.join(file_name)).unwrap().to_rgb8();
  assert_eq!(annotated.dimensions(), (400, 200));
}
