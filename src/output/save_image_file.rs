// 该文件是 yolo-ha 项目的一部分。
// src/output/save_image_file.rs - 保存标注图像
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

use chrono::{DateTime, Local};
use image::RgbImage;
use tracing::{info, warn};

use crate::output::OutputError;

/// 预览图文件名，位于系统临时目录
pub const PREVIEW_FILE_NAME: &str = "yolo-ha-preview.png";

/// `yolo-<label><YYYYMMDD-HHMMSS>.png`
pub fn snapshot_file_name(label: &str, time: &DateTime<Local>) -> String {
  format!("yolo-{}{}.png", label, time.format("%Y%m%d-%H%M%S"))
}

fn write_png(image: &RgbImage, path: &Path) -> Result<(), OutputError> {
  if let Some(parent) = path.parent()
    && !parent.as_os_str().is_empty()
  {
    std::fs::create_dir_all(parent).map_err(|source| OutputError::Io {
      path: parent.to_path_buf(),
      source,
    })?;
  }

  image
    .save_with_format(path, image::ImageFormat::Png)
    .map_err(|source| OutputError::Save {
      path: path.to_path_buf(),
      source,
    })
}

/// `-d`：检测到目标时把标注图保存到目录
pub struct SaveImageFileOutput {
  directory: PathBuf,
}

impl Default for SaveImageFileOutput {
  fn default() -> Self {
    Self::new(".")
  }
}

impl SaveImageFileOutput {
  pub fn new(directory: impl Into<PathBuf>) -> Self {
    Self {
      directory: directory.into(),
    }
  }

  pub fn save(&self, image: &RgbImage, label: &str) -> Result<PathBuf, OutputError> {
    let path = self
      .directory
      .join(snapshot_file_name(label, &Local::now()));
    write_png(image, &path)?;
    warn!("保存图像到文件: {}", path.display());
    Ok(path)
  }
}

/// `-s`：每帧覆盖写入同一个预览文件
pub struct PreviewOutput {
  path: PathBuf,
}

impl Default for PreviewOutput {
  fn default() -> Self {
    Self::new(std::env::temp_dir().join(PREVIEW_FILE_NAME))
  }
}

impl PreviewOutput {
  pub fn new(path: impl Into<PathBuf>) -> Self {
    Self { path: path.into() }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  pub fn show(&self, image: &RgbImage) -> Result<(), OutputError> {
    write_png(image, &self.path)?;
    info!("预览图已更新: {}", self.path.display());
    Ok(())
  }
}
