// 该文件是 yolo-ha 项目的一部分。
// src/frame.rs - 帧定义
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

use image::DynamicImage;

/// 帧数据
#[derive(Debug, Clone)]
pub struct Frame {
  /// 图像数据
  pub image: DynamicImage,
  /// 帧索引
  pub index: u64,
  /// 时间戳（毫秒）
  pub timestamp_ms: u64,
}

impl Frame {
  /// 单张图片构成的帧
  pub fn still(image: DynamicImage) -> Self {
    Self {
      image,
      index: 0,
      timestamp_ms: 0,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }

  pub fn channels(&self) -> u8 {
    self.image.color().channel_count()
  }
}

impl From<DynamicImage> for Frame {
  fn from(image: DynamicImage) -> Self {
    Frame::still(image)
  }
}

impl From<image::RgbImage> for Frame {
  fn from(image: image::RgbImage) -> Self {
    Frame::still(DynamicImage::ImageRgb8(image))
  }
}
