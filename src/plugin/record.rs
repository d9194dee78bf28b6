// 该文件是 yolo-ha 项目的一部分。
// src/plugin/record.rs - 目录记录插件
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

use chrono::{Datelike, Local};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
  model::Detection,
  plugin::{DispatchError, NotifyPlugin, PluginConfig},
};

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RecordConfig {
  path: Option<PathBuf>,
}

/// 把图像按日期存入目录，并在旁边写入同名 `.txt` 检测记录
pub struct RecordPlugin {
  directory: PathBuf,
  detections: Vec<Detection>,
  frame_counter: u16,
}

impl RecordPlugin {
  pub const ID: &'static str = "folder.Record";

  /// 读取配置中的 `folder` 节，`folder.path` 必填
  pub fn from_config(config: &PluginConfig) -> Result<Self, String> {
    let conf: RecordConfig = config.section("folder")?;
    let directory = conf
      .path
      .ok_or_else(|| "缺少配置项 folder.path".to_string())?;
    Ok(Self::new(directory))
  }

  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
      detections: Vec::new(),
      frame_counter: 0,
    }
  }

  fn frame_id(&mut self) -> u16 {
    self.frame_counter = self.frame_counter.wrapping_add(1);
    self.frame_counter
  }

  fn frame_path(&mut self) -> Result<PathBuf, DispatchError> {
    let now = Local::now();
    let directory = self
      .directory
      .join(now.year().to_string())
      .join(format!("{:02}", now.month()))
      .join(format!("{:02}", now.day()));
    std::fs::create_dir_all(&directory)?;

    let filename = format!("{}-{:04X}.png", now.format("%H-%M-%S"), self.frame_id());
    Ok(directory.join(filename))
  }

  fn write_record(&self, path: &Path) -> Result<(), DispatchError> {
    let records = self
      .detections
      .iter()
      .map(|det| {
        format!(
          "{}, {:.4}, {:.1}, {:.1}, {:.1}, {:.1}",
          det.label, det.score, det.bbox.x, det.bbox.y, det.bbox.width, det.bbox.height
        )
      })
      .collect::<Vec<_>>();
    std::fs::write(path.with_extension("txt"), records.join("\n"))?;
    Ok(())
  }
}

impl NotifyPlugin for RecordPlugin {
  fn publish_detection(&mut self, label: &str, score: f32) -> Result<(), DispatchError> {
    debug!("记录检测: {} {:.2}", label, score);
    Ok(())
  }

  fn publish_detections(&mut self, detections: &[Detection]) -> Result<(), DispatchError> {
    self.detections = detections.to_vec();
    Ok(())
  }

  fn publish_image(&mut self, png: &[u8]) -> Result<(), DispatchError> {
    let path = self.frame_path()?;
    std::fs::write(&path, png)?;
    self.write_record(&path)?;
    info!("保存检测记录到: {}", path.display());
    Ok(())
  }

  fn release(&mut self) -> Result<(), DispatchError> {
    self.detections.clear();
    Ok(())
  }
}
