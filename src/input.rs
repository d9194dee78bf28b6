// 该文件是 yolo-ha 项目的一部分。
// src/input.rs - 图像/摄像头输入
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

use thiserror::Error;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, frame::Frame};

mod read_image_file;
pub use self::read_image_file::ImageFileInput;

#[cfg(feature = "v4l_input")]
mod v4l2_source;
#[cfg(feature = "v4l_input")]
pub use self::v4l2_source::V4l2Source;

/// `-v 0` 对应的默认摄像头
pub const DEFAULT_CAMERA: &str = "/dev/video0";
pub const CAMERA_SCHEME: &str = "v4l";

#[derive(Error, Debug)]
pub enum InputError {
  #[error("无法打开图片文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("无法解码图片文件 {path}: {source}")]
  Decode {
    path: PathBuf,
    source: image::ImageError,
  },
  #[error("图片为空: {0}")]
  EmptyImage(PathBuf),
  #[error("URI 方案不匹配: {0}")]
  SchemeMismatch(String),
  #[error("摄像头错误: {0}")]
  Camera(String),
  #[error("未启用摄像头支持 (v4l_input): {0}")]
  CameraUnsupported(String),
  #[error("没有输入帧")]
  NoFrame,
}

/// 输入来源
pub enum InputWrapper {
  ReadImageFile(ImageFileInput),
  #[cfg(feature = "v4l_input")]
  V4l2Camera(V4l2Source),
}

impl FromUrl for InputWrapper {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    match url.scheme() {
      ImageFileInput::SCHEME => Ok(InputWrapper::ReadImageFile(ImageFileInput::from_url(url)?)),
      CAMERA_SCHEME => open_camera(url.path()),
      other => Err(InputError::SchemeMismatch(other.to_string())),
    }
  }
}

impl InputWrapper {
  /// 解析命令行/配置中的来源描述。
  ///
  /// - `0` 为默认摄像头，`/dev/videoN` 为指定摄像头
  /// - `image:///path` 与 `v4l:///dev/videoN` 形式的 URI
  /// - 其余视为图片文件路径
  pub fn open(source: &str) -> Result<Self, InputError> {
    let source = source.trim();
    if source == "0" {
      return open_camera(DEFAULT_CAMERA);
    }
    if source.starts_with("/dev/video") {
      return open_camera(source);
    }
    if source.contains("://")
      && let Ok(url) = Url::parse(source)
    {
      return Self::from_url(&url);
    }
    Ok(InputWrapper::ReadImageFile(ImageFileInput::open(source)?))
  }

  /// 是否为连续帧来源
  pub fn is_stream(&self) -> bool {
    match self {
      InputWrapper::ReadImageFile(_) => false,
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(_) => true,
    }
  }
}

impl Iterator for InputWrapper {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    match self {
      InputWrapper::ReadImageFile(input) => input.next().map(Ok),
      #[cfg(feature = "v4l_input")]
      InputWrapper::V4l2Camera(input) => input.next(),
    }
  }
}

#[cfg(feature = "v4l_input")]
fn open_camera(device: &str) -> Result<InputWrapper, InputError> {
  let device = if device.is_empty() { DEFAULT_CAMERA } else { device };
  Ok(InputWrapper::V4l2Camera(V4l2Source::new(device)?))
}

#[cfg(not(feature = "v4l_input"))]
fn open_camera(device: &str) -> Result<InputWrapper, InputError> {
  Err(InputError::CameraUnsupported(device.to_string()))
}
