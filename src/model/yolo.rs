// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/model/yolo.rs - YOLO 目标检测器
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
use std::sync::Mutex;
use std::time::Instant;

use image::RgbImage;
use ort::session::{Session, builder::GraphOptimizationLevel};
use ort::value::Tensor;
use thiserror::Error;
use tracing::{debug, error, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme, decode_url_path,
  frame::NchwBlob,
  model::{
    BBox, Detection, LabelError, LabelSet, Model, ModelConfig, ModelConfigError, Proposal,
    ThresholdError, Thresholds, non_max_suppression,
  },
};

/// 每行前 5 个值为 cx, cy, w, h, objectness
const YOLO_BOX_FIELDS: usize = 5;
const DEFAULT_CLASSES_FILE: &str = "coco.names";

#[derive(Error, Debug)]
pub enum YoloError {
  #[error("模型文件缺失: {0:?}")]
  MissingResources(Vec<PathBuf>),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("{0}")]
  Config(#[from] ModelConfigError),
  #[error("{0}")]
  Labels(#[from] LabelError),
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("模型无效: {0}")]
  ModelInvalid(String),
  #[error("阈值无效: {0}")]
  InvalidThreshold(#[from] ThresholdError),
  #[error("图像无效: {0}")]
  InvalidImage(String),
  #[error("推理错误: {0}")]
  Inference(String),
}

impl YoloError {
  /// 由调用方输入引起的错误（置信度阈值、图像）；NMS 阈值属于运行配置，与启动、推理错误一样不算输入错误
  pub fn is_input_error(&self) -> bool {
    matches!(
      self,
      YoloError::InvalidThreshold(ThresholdError::Confidence(_)) | YoloError::InvalidImage(_)
    )
  }

  fn load(e: impl std::fmt::Display) -> Self {
    YoloError::ModelLoadError(e.to_string())
  }

  fn inference(e: impl std::fmt::Display) -> Self {
    YoloError::Inference(e.to_string())
  }
}

/// 单个输出层的原始输出，按 `row_len` 切成 `num_anchors` 行
#[derive(Debug, Clone, Copy)]
pub struct RawOutput<'a> {
  pub row_len: usize,
  pub data: &'a [f32],
}

pub struct YoloDetectorBuilder {
  weights: PathBuf,
  config: PathBuf,
  classes: PathBuf,
  intra_threads: Option<usize>,
}

impl FromUrlWithScheme for YoloDetectorBuilder {
  const SCHEME: &'static str = "yolo";
}

impl FromUrl for YoloDetectorBuilder {
  type Error = YoloError;

  /// `yolo:///models/yolov4.onnx?config=/models/yolov4.toml&classes=/models/coco.names&threads=4`
  ///
  /// 省略 `config` 时使用同名 `.toml`，省略 `classes` 时使用同目录下的 `coco.names`。
  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(YoloError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }

    let weights = PathBuf::from(decode_url_path(url));
    let mut builder = YoloDetectorBuilder::with_default_resources(weights);

    for (key, value) in url.query_pairs() {
      match key.as_ref() {
        "config" => builder.config = PathBuf::from(value.as_ref()),
        "classes" => builder.classes = PathBuf::from(value.as_ref()),
        "threads" => {
          let threads = value
            .parse()
            .map_err(|_| YoloError::ModelPathError(format!("线程数无效: {}", value)))?;
          builder.intra_threads = Some(threads);
        }
        other => debug!("忽略未知参数: {}", other),
      }
    }

    Ok(builder)
  }
}

impl YoloDetectorBuilder {
  pub fn new(
    weights: impl Into<PathBuf>,
    config: impl Into<PathBuf>,
    classes: impl Into<PathBuf>,
  ) -> Self {
    Self {
      weights: weights.into(),
      config: config.into(),
      classes: classes.into(),
      intra_threads: None,
    }
  }

  fn with_default_resources(weights: PathBuf) -> Self {
    let config = weights.with_extension("toml");
    let classes = weights
      .parent()
      .map(|dir| dir.join(DEFAULT_CLASSES_FILE))
      .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASSES_FILE));
    Self::new(weights, config, classes)
  }

  pub fn intra_threads(mut self, threads: usize) -> Self {
    self.intra_threads = Some(threads);
    self
  }

  pub fn weights(&self) -> &Path {
    &self.weights
  }

  pub fn config(&self) -> &Path {
    &self.config
  }

  pub fn classes(&self) -> &Path {
    &self.classes
  }

  fn missing_resources(&self) -> Vec<PathBuf> {
    [&self.weights, &self.config, &self.classes]
      .into_iter()
      .filter(|path| !path.is_file())
      .cloned()
      .collect()
  }

  pub fn build(self) -> Result<YoloDetector, YoloError> {
    let missing = self.missing_resources();
    if !missing.is_empty() {
      error!("模型文件缺失: {:?}", missing);
      return Err(YoloError::MissingResources(missing));
    }

    let config = ModelConfig::from_file(&self.config)?;
    let labels = LabelSet::from_file(&self.classes)?;

    info!("加载模型文件: {}", self.weights.display());
    let mut builder = Session::builder()
      .map_err(YoloError::load)?
      .with_optimization_level(GraphOptimizationLevel::Level3)
      .map_err(YoloError::load)?;
    if let Some(threads) = self.intra_threads {
      builder = builder
        .with_intra_threads(threads)
        .map_err(YoloError::load)?;
    }
    let session = builder
      .commit_from_file(&self.weights)
      .map_err(YoloError::load)?;

    if session.inputs.len() != 1 {
      return Err(YoloError::ModelInvalid(format!(
        "预期模型输入数量为 1, 实际为 {}",
        session.inputs.len()
      )));
    }
    let input_name = session.inputs[0].name.clone();

    let output_names: Vec<String> = session
      .outputs
      .iter()
      .map(|output| output.name.clone())
      .collect();
    let output_layers = resolve_output_layers(&output_names, &config.output.layers)?;

    info!(
      "模型加载完成: {} 个类别, 输入 {} ({}x{}), 输出层 {:?}",
      labels.len(),
      input_name,
      config.input.width,
      config.input.height,
      output_layers
        .iter()
        .map(|&index| output_names[index].as_str())
        .collect::<Vec<_>>()
    );

    Ok(YoloDetector {
      session: Mutex::new(session),
      input_name,
      output_layers,
      labels,
      config,
    })
  }
}

/// 将输出层确定为模型输出下标的有序列表；未指定名称时取全部图输出
fn resolve_output_layers(
  output_names: &[String],
  requested: &[String],
) -> Result<Vec<usize>, YoloError> {
  if output_names.is_empty() {
    return Err(YoloError::ModelInvalid("模型没有输出".to_string()));
  }

  if requested.is_empty() {
    return Ok((0..output_names.len()).collect());
  }

  requested
    .iter()
    .map(|name| {
      output_names
        .iter()
        .position(|candidate| candidate == name)
        .ok_or_else(|| {
          YoloError::ModelInvalid(format!(
            "模型中不存在输出层 {}, 可用输出: {:?}",
            name, output_names
          ))
        })
    })
    .collect()
}

/// YOLO 目标检测器，进程内加载一次，可通过 `Arc` 在多个请求间共享
pub struct YoloDetector {
  session: Mutex<Session>,
  input_name: String,
  output_layers: Vec<usize>,
  labels: LabelSet,
  config: ModelConfig,
}

impl YoloDetector {
  pub fn labels(&self) -> &LabelSet {
    &self.labels
  }

  pub fn output_layers(&self) -> &[usize] {
    &self.output_layers
  }

  /// 运行推理
  pub fn detect(
    &self,
    image: &RgbImage,
    thresholds: &Thresholds,
  ) -> Result<Vec<Detection>, YoloError> {
    thresholds.validate()?;

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(YoloError::InvalidImage(format!(
        "图像尺寸为 {}x{}",
        width, height
      )));
    }

    let input = &self.config.input;
    let blob = NchwBlob::from_image(
      image,
      input.width,
      input.height,
      input.scale,
      input.channel_order,
    );
    let shape = blob.shape();
    let tensor =
      Tensor::from_array((shape.as_slice(), blob.into_raw())).map_err(YoloError::inference)?;

    let now = Instant::now();
    let proposals = {
      let mut session = self
        .session
        .lock()
        .map_err(|_| YoloError::Inference("推理会话锁已失效".to_string()))?;
      let outputs = session
        .run(ort::inputs![self.input_name.as_str() => tensor])
        .map_err(YoloError::inference)?;
      debug!("推理完成，耗时: {:.2?}", now.elapsed());

      let mut raw = Vec::with_capacity(self.output_layers.len());
      for &index in &self.output_layers {
        let (shape, data) = outputs[index]
          .try_extract_tensor::<f32>()
          .map_err(YoloError::inference)?;
        let row_len = shape.last().copied().unwrap_or(0).max(0) as usize;
        raw.push(RawOutput { row_len, data });
      }

      Self::decode_proposals(
        &raw,
        self.labels.len(),
        thresholds.confidence,
        width,
        height,
      )?
    };

    let detections = Self::finalize(proposals, &self.labels, width, height, thresholds);
    debug!("检测到 {} 个物体", detections.len());
    Ok(detections)
  }

  /// 由原始输出得到最终检测结果：置信度过滤、NMS、边框裁剪
  pub fn postprocess(
    outputs: &[RawOutput<'_>],
    labels: &LabelSet,
    image_width: u32,
    image_height: u32,
    thresholds: &Thresholds,
  ) -> Result<Vec<Detection>, YoloError> {
    let proposals = Self::decode_proposals(
      outputs,
      labels.len(),
      thresholds.confidence,
      image_width,
      image_height,
    )?;
    Ok(Self::finalize(
      proposals,
      labels,
      image_width,
      image_height,
      thresholds,
    ))
  }

  fn decode_proposals(
    outputs: &[RawOutput<'_>],
    num_classes: usize,
    confidence_threshold: f32,
    image_width: u32,
    image_height: u32,
  ) -> Result<Vec<Proposal>, YoloError> {
    if num_classes == 0 {
      return Err(YoloError::ModelInvalid("类别列表为空".to_string()));
    }
    let expected = YOLO_BOX_FIELDS + num_classes;
    let (w, h) = (image_width as f32, image_height as f32);
    let mut proposals = Vec::new();

    for (layer, output) in outputs.iter().enumerate() {
      if output.row_len != expected || output.data.len() % expected != 0 {
        return Err(YoloError::Inference(format!(
          "输出层 {} 维度不匹配: 行长度 {}, 数据长度 {}, 期望行长度 {}",
          layer,
          output.row_len,
          output.data.len(),
          expected
        )));
      }

      for row in output.data.chunks_exact(expected) {
        let scores = &row[YOLO_BOX_FIELDS..];
        let mut class_id = 0usize;
        for (c, &score) in scores.iter().enumerate() {
          if score > scores[class_id] {
            class_id = c;
          }
        }

        let confidence = scores[class_id];
        if !(confidence > confidence_threshold) {
          continue;
        }

        proposals.push(Proposal {
          class_id,
          confidence,
          bbox: BBox::from_center(row[0] * w, row[1] * h, row[2] * w, row[3] * h),
        });
      }
    }

    debug!("置信度过滤后剩余 {} 个候选框", proposals.len());
    Ok(proposals)
  }

  fn finalize(
    proposals: Vec<Proposal>,
    labels: &LabelSet,
    image_width: u32,
    image_height: u32,
    thresholds: &Thresholds,
  ) -> Vec<Detection> {
    non_max_suppression(proposals, thresholds.nms, thresholds.nms_mode)
      .into_iter()
      .map(|proposal| Detection {
        class_name: labels
          .name(proposal.class_id)
          .unwrap_or("unknown")
          .to_string(),
        class_id: proposal.class_id,
        confidence: proposal.confidence,
        bbox: proposal.bbox.clamp_to(image_width, image_height),
      })
      .collect()
  }
}

impl Model for YoloDetector {
  type Error = YoloError;

  fn infer(&self, image: &RgbImage, thresholds: &Thresholds) -> Result<Vec<Detection>, Self::Error> {
    self.detect(image, thresholds)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::NmsMode;

  fn labels() -> LabelSet {
    ["bottle", "cup", "fork"].into_iter().collect()
  }

  fn row(cx: f32, cy: f32, w: f32, h: f32, scores: [f32; 3]) -> Vec<f32> {
    let mut row = vec![cx, cy, w, h, 1.0];
    row.extend_from_slice(&scores);
    row
  }

  #[test]
  fn decodes_boxes_against_original_image_size() {
    let data = row(0.5, 0.5, 0.25, 0.5, [0.1, 0.9, 0.2]);
    let outputs = [RawOutput {
      row_len: 8,
      data: &data,
    }];

    let detections =
      YoloDetector::postprocess(&outputs, &labels(), 640, 480, &Thresholds::default()).unwrap();

    assert_eq!(detections.len(), 1);
    let detection = &detections[0];
    assert_eq!(detection.class_name, "cup");
    assert_eq!(detection.class_id, 1);
    assert!((detection.confidence - 0.9).abs() < 1e-6);
    assert_eq!(detection.bbox, BBox::new(240, 120, 160, 240));
  }

  #[test]
  fn confidence_equal_to_threshold_is_discarded() {
    let mut data = row(0.5, 0.5, 0.1, 0.1, [0.5, 0.0, 0.0]);
    data.extend(row(0.2, 0.2, 0.1, 0.1, [0.0, 0.0, 0.51]));
    let outputs = [RawOutput {
      row_len: 8,
      data: &data,
    }];

    let detections =
      YoloDetector::postprocess(&outputs, &labels(), 100, 100, &Thresholds::default()).unwrap();
    assert_eq!(detections.len(), 1);
    assert_eq!(detections[0].class_name, "fork");
    assert!(detections.iter().all(|d| d.confidence > 0.5));
  }

  #[test]
  fn proposals_from_all_output_layers_are_merged_before_nms() {
    let first = row(0.5, 0.5, 0.2, 0.2, [0.8, 0.0, 0.0]);
    let second = row(0.51, 0.5, 0.2, 0.2, [0.95, 0.0, 0.0]);
    let outputs = [
      RawOutput {
        row_len: 8,
        data: &first,
      },
      RawOutput {
        row_len: 8,
        data: &second,
      },
    ];

    let detections =
      YoloDetector::postprocess(&outputs, &labels(), 200, 200, &Thresholds::default()).unwrap();
    assert_eq!(detections.len(), 1);
    assert!((detections[0].confidence - 0.95).abs() < 1e-6);
  }

  #[test]
  fn boxes_crossing_the_edge_are_clamped() {
    let data = row(0.0, 0.05, 0.2, 0.2, [0.9, 0.0, 0.0]);
    let outputs = [RawOutput {
      row_len: 8,
      data: &data,
    }];

    let detections =
      YoloDetector::postprocess(&outputs, &labels(), 100, 100, &Thresholds::default()).unwrap();
    let bbox = detections[0].bbox;
    // 裁剪前为 (-10, -5, 20, 20)
    assert_eq!(bbox, BBox::new(0, 0, 10, 15));
  }

  #[test]
  fn global_mode_suppresses_across_classes() {
    let mut data = row(0.5, 0.5, 0.4, 0.4, [0.9, 0.0, 0.0]);
    data.extend(row(0.5, 0.5, 0.4, 0.4, [0.0, 0.8, 0.0]));
    let outputs = [RawOutput {
      row_len: 8,
      data: &data,
    }];

    let grouped =
      YoloDetector::postprocess(&outputs, &labels(), 100, 100, &Thresholds::default()).unwrap();
    assert_eq!(grouped.len(), 2);

    let thresholds = Thresholds::default().with_nms_mode(NmsMode::Global);
    let global = YoloDetector::postprocess(&outputs, &labels(), 100, 100, &thresholds).unwrap();
    assert_eq!(global.len(), 1);
    assert_eq!(global[0].class_name, "bottle");
  }

  #[test]
  fn mismatched_row_length_is_an_inference_error() {
    let data = vec![0.0f32; 14];
    let outputs = [RawOutput {
      row_len: 7,
      data: &data,
    }];

    let result = YoloDetector::postprocess(&outputs, &labels(), 100, 100, &Thresholds::default());
    assert!(matches!(result, Err(YoloError::Inference(_))));
    assert!(!result.unwrap_err().is_input_error());
  }

  #[test]
  fn output_layers_default_to_all_graph_outputs() {
    let names = vec!["yolo_139".to_string(), "yolo_150".to_string()];
    assert_eq!(resolve_output_layers(&names, &[]).unwrap(), vec![0, 1]);
    assert_eq!(
      resolve_output_layers(&names, &["yolo_150".to_string()]).unwrap(),
      vec![1]
    );
    assert!(resolve_output_layers(&names, &["conv_1".to_string()]).is_err());
    assert!(resolve_output_layers(&[], &[]).is_err());
  }

  #[test]
  fn build_reports_every_missing_resource() {
    let dir = tempfile::tempdir().unwrap();
    let weights = dir.path().join("yolov4.onnx");
    let config = dir.path().join("yolov4.toml");
    let classes = dir.path().join("coco.names");
    std::fs::write(&classes, "bottle\n").unwrap();

    let result = YoloDetectorBuilder::new(&weights, &config, &classes).build();
    match result {
      Err(YoloError::MissingResources(missing)) => assert_eq!(missing, vec![weights, config]),
      Err(other) => panic!("unexpected error: {other}"),
      Ok(_) => panic!("detector must not load without resources"),
    }
  }

  #[test]
  fn builder_from_url_fills_default_resources() {
    let url = Url::parse("yolo:///opt/models/yolov4.onnx?threads=2").unwrap();
    let builder = YoloDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.weights(), Path::new("/opt/models/yolov4.onnx"));
    assert_eq!(builder.config(), Path::new("/opt/models/yolov4.toml"));
    assert_eq!(builder.classes(), Path::new("/opt/models/coco.names"));
    assert_eq!(builder.intra_threads, Some(2));

    let url = Url::parse("yolo:///m/a.onnx?config=/c/a.toml&classes=/c/voc.names").unwrap();
    let builder = YoloDetectorBuilder::from_url(&url).unwrap();
    assert_eq!(builder.config(), Path::new("/c/a.toml"));
    assert_eq!(builder.classes(), Path::new("/c/voc.names"));

    let url = Url::parse("onnx:///m/a.onnx").unwrap();
    assert!(YoloDetectorBuilder::from_url(&url).is_err());
  }

  #[test]
  fn detector_can_be_shared_across_threads() {
    fn assert_send_sync<T: Send + Sync>() {}
    assert_send_sync::<YoloDetector>();
    assert_send_sync::<std::sync::Arc<YoloDetector>>();
  }

  #[test]
  fn only_confidence_threshold_is_an_input_error() {
    let confidence = YoloError::from(ThresholdError::Confidence(1.5));
    assert!(confidence.is_input_error());

    let nms = YoloError::from(ThresholdError::Nms(0.0));
    assert!(!nms.is_input_error());
  }
}
