// 该文件是 Cangku （仓库识物） 项目的一部分。
// src/main.rs - 命令行主程序
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

mod args;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use cangku::{
  FromUrl,
  model::{Thresholds, YoloDetectorBuilder},
  output::{NoRender, Render},
  store::{MappingStore, StoreWrapper},
  task::DetectionTask,
};

use args::{Args, Command, DetectArgs, MapObjectArgs};

#[cfg(feature = "save_image_file")]
fn default_render() -> Box<dyn Render> {
  Box::new(cangku::output::SaveImageFileOutput::default())
}

#[cfg(not(feature = "save_image_file"))]
fn default_render() -> Box<dyn Render> {
  Box::new(NoRender)
}

fn detect(args: DetectArgs) -> Result<()> {
  info!("模型地址: {}", args.model);
  info!("输入图像: {}", args.input.display());
  info!("存储地址: {}", args.store);

  Thresholds::default()
    .with_nms(args.nms_threshold)
    .validate()
    .context("--nms-threshold 配置无效")?;

  let mut builder = YoloDetectorBuilder::from_url(&args.model)
    .with_context(|| format!("无效的模型地址: {}", args.model))?;
  if let Some(threads) = args.threads {
    builder = builder.intra_threads(threads);
  }

  let now = std::time::Instant::now();
  let model = builder.build().context("模型加载失败")?;
  info!(
    "模型加载完成，{} 个类别，输出层 {:?}，耗时: {:.2?}",
    model.labels().len(),
    model.output_layers(),
    now.elapsed()
  );

  let store = StoreWrapper::from_url(&args.store)
    .with_context(|| format!("无效的存储地址: {}", args.store))?;
  let render: Box<dyn Render> = if args.no_annotate {
    Box::new(NoRender)
  } else {
    default_render()
  };

  let task = DetectionTask::new(model, render, store, &args.output_dir)
    .with_public_prefix(args.public_prefix)
    .with_nms_threshold(args.nms_threshold)
    .with_nms_mode(args.nms_mode);

  let response = task
    .process_file(&args.input, args.confidence.as_deref())
    .map_err(|e| {
      let kind = if e.is_client_error() {
        "请求无效"
      } else {
        "识物失败"
      };
      anyhow::Error::new(e).context(kind)
    })?;

  println!("{}", serde_json::to_string_pretty(&response)?);
  Ok(())
}

fn map_object(args: MapObjectArgs) -> Result<()> {
  let store = StoreWrapper::from_url(&args.store)
    .with_context(|| format!("无效的存储地址: {}", args.store))?;
  store
    .upsert(&args.name, args.category_id)
    .with_context(|| format!("无法保存映射 {} -> {}", args.name, args.category_id))?;
  info!("映射已保存: {} -> {}", args.name.trim(), args.category_id);
  Ok(())
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_writer(std::io::stderr)
    .init();

  let args = Args::parse();

  match args.command {
    Command::Detect(args) => detect(args),
    Command::MapObject(args) => map_object(args),
  }
}
