// 该文件是 yolo-ha 项目的一部分。
// src/main.rs - 主程序
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

use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};

use yolo_ha::{
  input::InputWrapper,
  model::{Backend, Detector, DetectorConfig},
  output::{PreviewOutput, SaveImageFileOutput},
  plugin::PluginRegistry,
  task::{ContinuousTask, OneShotTask, Pipeline, Task},
};

use crate::args::{Args, Settings};

/// 参数或配置错误
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
  // 标准输出留给消息总线插件
  tracing_subscriber::fmt().with_writer(std::io::stderr).init();

  execute(Args::parse(), &PluginRegistry::with_builtins(), load_backend)
}

/// 解析配置并运行，返回进程退出码
fn execute<B, F>(args: Args, registry: &PluginRegistry, load_backend: F) -> ExitCode
where
  B: Backend,
  F: FnOnce(&Settings) -> Result<B>,
{
  let settings = match args.resolve() {
    Ok(settings) => settings,
    Err(e) => {
      error!("{}", e);
      return ExitCode::from(EXIT_USAGE);
    }
  };

  match run(&settings, registry, load_backend) {
    Ok(()) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::FAILURE
    }
  }
}

fn run<B, F>(settings: &Settings, registry: &PluginRegistry, load_backend: F) -> Result<()>
where
  B: Backend,
  F: FnOnce(&Settings) -> Result<B>,
{
  // 插件必须在加载模型、读取图像之前解析成功
  let guard = registry
    .resolve(&settings.plugin, &settings.plugin_config)
    .with_context(|| format!("无法加载插件 {}", settings.plugin))?;
  info!("插件已加载: {}", guard.id());

  let backend = load_backend(settings)?;
  let config = DetectorConfig {
    net_w: settings.net_size,
    net_h: settings.net_size,
    confidence_threshold: settings.confidence,
    nms_threshold: settings.nms,
  };
  let mut pipeline = Pipeline::new(Detector::new(backend, config));
  if settings.save {
    pipeline = pipeline.with_save(SaveImageFileOutput::default());
  }
  if settings.show {
    let preview = PreviewOutput::default();
    info!("预览文件: {}", preview.path().display());
    pipeline = pipeline.with_preview(preview);
  }

  let input = InputWrapper::open(&settings.video)
    .with_context(|| format!("无法打开输入来源 {}", settings.video))?;

  if input.is_stream() {
    ContinuousTask::default()
      .with_frame_number(settings.frames)
      .with_interrupt_handler(true)
      .run_task(input, &mut pipeline, guard)?;
  } else {
    OneShotTask.run_task(input, &mut pipeline, guard)?;
  }

  Ok(())
}

#[cfg(feature = "model_onnx")]
fn load_backend(settings: &Settings) -> Result<yolo_ha::model::OnnxBackend> {
  info!("正在加载模型: {}", settings.model.display());
  let backend = yolo_ha::model::OnnxBackend::from_path(&settings.model)?;
  info!("模型加载完成");
  Ok(backend)
}

/// 未启用任何后端时的占位类型，无法构造
#[cfg(not(feature = "model_onnx"))]
enum NoBackend {}

#[cfg(not(feature = "model_onnx"))]
impl Backend for NoBackend {
  type Error = std::convert::Infallible;

  fn infer(
    &mut self,
    _input: &yolo_ha::letterbox::LetterboxedTensor,
    _min_score: f32,
  ) -> Result<Vec<yolo_ha::model::RawDetection>, Self::Error> {
    match *self {}
  }
}

#[cfg(not(feature = "model_onnx"))]
fn load_backend(settings: &Settings) -> Result<NoBackend> {
  anyhow::bail!(
    "未编译任何检测后端，无法加载模型 {}（请启用 model_onnx 特性）",
    settings.model.display()
  )
}
