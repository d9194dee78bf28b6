// 该文件是 yolo-ha 项目的一部分。
// src/task.rs - 检测任务：单次与连续
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
use std::sync::mpsc::{self, Receiver};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
  frame::Frame,
  input::InputError,
  model::{Backend, DetectResult, Detector, DetectorError},
  output::{Draw, OutputError, PreviewOutput, SaveImageFileOutput, encode_png},
  plugin::{DispatchError, PluginError, PluginGuard, dispatch},
};

#[derive(Error, Debug)]
pub enum TaskError {
  #[error("输入错误: {0}")]
  Input(#[from] InputError),
  #[error("检测错误: {0}")]
  Detector(#[from] DetectorError),
  #[error("插件错误: {0}")]
  Plugin(#[from] PluginError),
  #[error("通知失败: {0}")]
  Dispatch(#[from] DispatchError),
  #[error("输出错误: {0}")]
  Output(#[from] OutputError),
  #[error("无法设置 Ctrl-C 处理器: {0}")]
  Interrupt(#[from] ctrlc::Error),
}

/// 单帧处理结果
#[derive(Debug)]
pub struct CycleOutcome {
  pub result: DetectResult,
  /// 是否向插件发送了通知
  pub dispatched: bool,
  /// `-d` 保存的文件
  pub saved: Option<PathBuf>,
}

/// 检测 -> 标注 -> 通知 -> 保存/预览
pub struct Pipeline<B> {
  detector: Detector<B>,
  draw: Draw,
  save: Option<SaveImageFileOutput>,
  preview: Option<PreviewOutput>,
}

impl<B: Backend> Pipeline<B> {
  pub fn new(detector: Detector<B>) -> Self {
    Self {
      detector,
      draw: Draw::default(),
      save: None,
      preview: None,
    }
  }

  pub fn with_save(mut self, save: SaveImageFileOutput) -> Self {
    self.save = Some(save);
    self
  }

  pub fn with_preview(mut self, preview: PreviewOutput) -> Self {
    self.preview = Some(preview);
    self
  }

  pub fn run_cycle(
    &mut self,
    frame: &Frame,
    guard: &mut PluginGuard,
  ) -> Result<CycleOutcome, TaskError> {
    let result = self.detector.detect(&frame.image)?;
    let top = result.top();
    info!("当前最高分: {:.2}", top.score);

    let annotated = self.draw.annotate(
      &frame.image,
      &result,
      self.detector.last_inference_time_ms(),
    );

    let dispatched = dispatch(guard, &result, || {
      encode_png(&annotated).map_err(|e| DispatchError::Other(e.to_string()))
    })?;

    let mut saved = None;
    if let Some(label) = top.label {
      info!("*** 检测到 {}", label);
      if let Some(save) = &self.save {
        saved = Some(save.save(&annotated, label)?);
      }
    }

    if let Some(preview) = &self.preview {
      preview.show(&annotated)?;
    }

    Ok(CycleOutcome {
      result,
      dispatched,
      saved,
    })
  }
}

pub trait Task<I, B>: Sized {
  type Output;
  fn run_task(
    self,
    input: I,
    pipeline: &mut Pipeline<B>,
    guard: PluginGuard,
  ) -> Result<Self::Output, TaskError>;
}

/// 只处理第一帧；发送过通知时释放插件
pub struct OneShotTask;

impl<I, B> Task<I, B> for OneShotTask
where
  I: Iterator<Item = Result<Frame, InputError>>,
  B: Backend,
{
  type Output = CycleOutcome;

  fn run_task(
    self,
    mut input: I,
    pipeline: &mut Pipeline<B>,
    mut guard: PluginGuard,
  ) -> Result<Self::Output, TaskError> {
    info!("开始任务...");
    let frame = input.next().ok_or(InputError::NoFrame)??;
    info!("输入帧获取成功，开始推理...");

    let outcome = pipeline.run_cycle(&frame, &mut guard)?;
    if outcome.dispatched {
      guard.release()?;
    }

    info!("任务完成");
    Ok(outcome)
  }
}

/// 逐帧处理直到输入结束、达到帧数或收到 Ctrl-C，插件在结束时释放一次
#[derive(Default, Debug)]
pub struct ContinuousTask {
  frame_number: Option<usize>,
  handle_interrupt: bool,
}

impl ContinuousTask {
  pub fn with_frame_number(mut self, frame_number: Option<usize>) -> Self {
    self.frame_number = frame_number;
    self
  }

  pub fn with_interrupt_handler(mut self, handle_interrupt: bool) -> Self {
    self.handle_interrupt = handle_interrupt;
    self
  }

  fn interrupt_channel(&self) -> Result<Option<Receiver<()>>, TaskError> {
    if !self.handle_interrupt {
      return Ok(None);
    }

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
    })?;
    Ok(Some(rx))
  }
}

impl<I, B> Task<I, B> for ContinuousTask
where
  I: Iterator<Item = Result<Frame, InputError>>,
  B: Backend,
{
  /// 处理的帧数
  type Output = usize;

  fn run_task(
    self,
    input: I,
    pipeline: &mut Pipeline<B>,
    mut guard: PluginGuard,
  ) -> Result<Self::Output, TaskError> {
    info!("开始任务...");
    let interrupt = self.interrupt_channel()?;
    guard.engage();

    let mut processed = 0;
    for frame in input {
      let frame = frame?;
      processed += 1;
      info!("处理第 {} 帧图像", processed);

      let outcome = pipeline.run_cycle(&frame, &mut guard)?;
      if outcome.dispatched {
        info!("第 {} 帧已通知插件", processed);
      }

      if self.frame_number.is_some_and(|n| processed >= n) {
        info!("达到指定帧数 {}, 退出任务循环", processed);
        break;
      }
      if interrupt.as_ref().is_some_and(|rx| rx.try_recv().is_ok()) {
        warn!("中断信号接收，退出任务循环");
        break;
      }
    }

    guard.release()?;
    info!("任务完成，共处理 {} 帧", processed);
    Ok(processed)
  }
}
