// 该文件是 yolo-ha 项目的一部分。
// src/output.rs - 输出：标注、编码与保存
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

use std::io::Cursor;
use std::path::PathBuf;

use image::{ImageFormat, RgbImage};
use thiserror::Error;

pub mod draw;
mod save_image_file;

pub use self::draw::Draw;
pub use self::save_image_file::{
  PREVIEW_FILE_NAME, PreviewOutput, SaveImageFileOutput, snapshot_file_name,
};

#[derive(Error, Debug)]
pub enum OutputError {
  #[error("PNG 编码失败: {0}")]
  Encode(#[source] image::ImageError),
  #[error("无法保存图像 {path}: {source}")]
  Save {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("无法创建目录 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
}

/// 把标注图编码为 PNG 字节
pub fn encode_png(image: &RgbImage) -> Result<Vec<u8>, OutputError> {
  let mut buffer = Cursor::new(Vec::new());
  image
    .write_to(&mut buffer, ImageFormat::Png)
    .map_err(OutputError::Encode)?;
  Ok(buffer.into_inner())
}
