// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/task.rs - 识物请求处理流程
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
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::{
  input::{ImageFileInput, ImageFileInputError},
  mapping::{CategoryMapper, CategorySuggestion, MappingStatus},
  model::{DEFAULT_CONFIDENCE_THRESHOLD, Detection, Model, NmsMode, Thresholds, YoloError},
  output::{Annotation, Render, result_file_name},
  store::{ItemStore, MappingStore},
};

/// 上传请求中覆盖置信度阈值的请求头
pub const CONFIDENCE_HEADER: &str = "X-Confidence-Threshold";

pub const DEFAULT_PUBLIC_PREFIX: &str = "/api/images/";

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入错误: {0}")]
  Input(#[from] ImageFileInputError),
  #[error("置信度阈值无效: {0:?}")]
  InvalidConfidence(String),
  #[error("检测失败: {0}")]
  Detection(#[from] YoloError),
}

impl TaskError {
  /// 调用方输入导致的错误（4xx），其余为服务端错误（5xx）
  pub fn is_client_error(&self) -> bool {
    match self {
      TaskError::Input(_) | TaskError::InvalidConfidence(_) => true,
      TaskError::Detection(e) => e.is_input_error(),
    }
  }
}

/// 解析置信度请求头，缺省或为空时取 0.5，取值必须在 (0, 1) 之间
pub fn parse_confidence_header(value: Option<&str>) -> Result<f32, TaskError> {
  let Some(raw) = value.map(str::trim).filter(|v| !v.is_empty()) else {
    return Ok(DEFAULT_CONFIDENCE_THRESHOLD);
  };

  let confidence: f32 = raw
    .parse()
    .map_err(|_| TaskError::InvalidConfidence(raw.to_string()))?;
  if confidence > 0.0 && confidence < 1.0 {
    Ok(confidence)
  } else {
    Err(TaskError::InvalidConfidence(raw.to_string()))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetectionResponse {
  pub success: bool,
  pub detections: Vec<Detection>,
  /// 标注图像的访问标识，标注失败时为 `null`
  pub annotated_image: Option<String>,
  pub category_suggestions: Vec<CategorySuggestion>,
  pub unmapped_objects: Vec<String>,
  #[serde(skip_serializing_if = "MappingStatus::is_complete")]
  pub mapping_status: MappingStatus,
}

/// 一次识物请求：检测、标注、类别映射
pub struct DetectionTask<M, R, S> {
  model: M,
  render: R,
  store: S,
  output_dir: PathBuf,
  public_prefix: String,
  nms_threshold: f32,
  nms_mode: NmsMode,
}

impl<M, R, S> DetectionTask<M, R, S>
where
  M: Model<Error = YoloError>,
  R: Render,
  S: MappingStore + ItemStore,
{
  pub fn new(model: M, render: R, store: S, output_dir: impl Into<PathBuf>) -> Self {
    let defaults = Thresholds::default();
    Self {
      model,
      render,
      store,
      output_dir: output_dir.into(),
      public_prefix: DEFAULT_PUBLIC_PREFIX.to_string(),
      nms_threshold: defaults.nms,
      nms_mode: defaults.nms_mode,
    }
  }

  pub fn with_public_prefix(mut self, prefix: impl Into<String>) -> Self {
    self.public_prefix = prefix.into();
    self
  }

  pub fn with_nms_threshold(mut self, nms_threshold: f32) -> Self {
    self.nms_threshold = nms_threshold;
    self
  }

  pub fn with_nms_mode(mut self, nms_mode: NmsMode) -> Self {
    self.nms_mode = nms_mode;
    self
  }

  /// 处理上传内容，`confidence_header` 为请求头原始值
  pub fn process_upload(
    &self,
    file_name: &str,
    bytes: &[u8],
    confidence_header: Option<&str>,
  ) -> Result<DetectionResponse, TaskError> {
    let confidence = parse_confidence_header(confidence_header)?;
    let input = ImageFileInput::from_bytes(file_name, bytes)?;
    self.run(&input, confidence)
  }

  /// 处理已保存到磁盘的上传文件
  pub fn process_file(
    &self,
    path: impl AsRef<Path>,
    confidence_header: Option<&str>,
  ) -> Result<DetectionResponse, TaskError> {
    let confidence = parse_confidence_header(confidence_header)?;
    let input = ImageFileInput::open(path)?;
    self.run(&input, confidence)
  }

  pub fn run(
    &self,
    input: &ImageFileInput,
    confidence: f32,
  ) -> Result<DetectionResponse, TaskError> {
    let thresholds = Thresholds::default()
      .with_confidence(confidence)
      .with_nms(self.nms_threshold)
      .with_nms_mode(self.nms_mode);

    info!(
      "开始识物: {} ({}x{}), 置信度阈值 {}",
      input.file_name(),
      input.width(),
      input.height(),
      confidence
    );

    let now = Instant::now();
    let detections = self.model.infer(input.image(), &thresholds)?;
    info!(
      "检测完成，共 {} 个目标，耗时: {:.2?}",
      detections.len(),
      now.elapsed()
    );

    let now = Instant::now();
    let output_path = self.output_dir.join(result_file_name(&input.file_name()));
    let annotated_image = match self.render.render(input.image(), &output_path, &detections) {
      Annotation::Written(path) => path
        .file_name()
        .map(|name| format!("{}{}", self.public_prefix, name.to_string_lossy())),
      Annotation::Skipped(reason) => {
        warn!("未生成标注图像: {}", reason);
        None
      }
    };
    info!("标注完成，耗时: {:.2?}", now.elapsed());

    let now = Instant::now();
    let outcome = CategoryMapper::new(&self.store, &self.store).map(&detections);
    info!(
      "类别映射完成，{} 条建议，{} 个未映射对象，耗时: {:.2?}",
      outcome.suggestions.len(),
      outcome.unmapped_objects.len(),
      now.elapsed()
    );

    Ok(DetectionResponse {
      success: true,
      detections,
      annotated_image,
      category_suggestions: outcome.suggestions,
      unmapped_objects: outcome.unmapped_objects,
      mapping_status: outcome.status,
    })
  }
}
