// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/args.rs - 命令行参数
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

use std::path::PathBuf;

use cangku::model::{DEFAULT_NMS_THRESHOLD, NmsMode};
use cangku::task::DEFAULT_PUBLIC_PREFIX;
use clap::{Args as ClapArgs, Parser, Subcommand};
use url::Url;

/// Cangku 仓库识物
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  #[command(subcommand)]
  pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
  /// 识别一张图像并给出库存类别建议
  Detect(DetectArgs),
  /// 新增或更新一条对象到类别的映射
  MapObject(MapObjectArgs),
}

#[derive(ClapArgs, Debug)]
pub struct DetectArgs {
  /// 模型地址，例如 yolo:///models/yolov3.onnx?config=yolov3.toml&classes=coco.names
  #[arg(long, value_name = "MODEL")]
  pub model: Url,

  /// 推理线程数
  #[arg(long, value_name = "THREADS")]
  pub threads: Option<usize>,

  /// 上传的图像文件（png / jpg / jpeg）
  #[arg(long, value_name = "FILE")]
  pub input: PathBuf,

  /// 标注图像输出目录
  #[arg(long, default_value = "results", value_name = "DIR")]
  pub output_dir: PathBuf,

  /// 标注图像对外访问前缀
  #[arg(long, default_value = DEFAULT_PUBLIC_PREFIX, value_name = "PREFIX")]
  pub public_prefix: String,

  /// 不生成标注图像
  #[arg(long)]
  pub no_annotate: bool,

  /// 映射与库存存储，memory:// 或 json:///path/inventory.json
  #[arg(long, default_value = "memory://", value_name = "STORE")]
  pub store: Url,

  /// 置信度阈值，按 X-Confidence-Threshold 请求头的原始值解析
  #[arg(long, value_name = "THRESHOLD")]
  pub confidence: Option<String>,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = DEFAULT_NMS_THRESHOLD, value_name = "THRESHOLD")]
  pub nms_threshold: f32,

  /// NMS 抑制范围: grouped（按类别）或 global
  #[arg(long, default_value = "grouped", value_name = "MODE")]
  pub nms_mode: NmsMode,
}

#[derive(ClapArgs, Debug)]
pub struct MapObjectArgs {
  /// 映射与库存存储
  #[arg(long, value_name = "STORE")]
  pub store: Url,

  /// 检测类别名称，例如 bottle
  #[arg(long, value_name = "NAME")]
  pub name: String,

  /// 目标库存类别 ID
  #[arg(long, value_name = "ID")]
  pub category_id: i64,
}
