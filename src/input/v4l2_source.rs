// 该文件是 yolo-ha 项目的一部分。
// src/input/v4l2_source.rs - V4L2 摄像头输入源
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

use std::time::Instant;

use image::{DynamicImage, RgbImage};
use tracing::info;
use v4l::FourCC;
use v4l::buffer::Type;
use v4l::io::mmap::Stream;
use v4l::io::traits::CaptureStream;
use v4l::prelude::*;
use v4l::video::Capture;

use crate::{frame::Frame, input::InputError};

const CAPTURE_WIDTH: u32 = 640;
const CAPTURE_HEIGHT: u32 = 480;
const CAPTURE_BUFFERS: u32 = 4;

/// V4L2 摄像头输入源，逐帧采集 YUYV 并转换为 RGB
pub struct V4l2Source {
  stream: Stream<'static>,
  frame_index: u64,
  width: u32,
  height: u32,
  start_time: Instant,
}

fn camera_error(device_path: &str, e: std::io::Error) -> InputError {
  InputError::Camera(format!("{}: {}", device_path, e))
}

impl V4l2Source {
  pub fn new(device_path: &str) -> Result<Self, InputError> {
    let device = Device::with_path(device_path).map_err(|e| camera_error(device_path, e))?;

    // 设置视频格式
    let mut format = device.format().map_err(|e| camera_error(device_path, e))?;
    format.width = CAPTURE_WIDTH;
    format.height = CAPTURE_HEIGHT;
    format.fourcc = FourCC::new(b"YUYV");
    let format = device
      .set_format(&format)
      .map_err(|e| camera_error(device_path, e))?;

    if format.fourcc != FourCC::new(b"YUYV") {
      return Err(InputError::Camera(format!(
        "{}: 不支持的像素格式 {}",
        device_path, format.fourcc
      )));
    }

    // 流持有设备句柄的引用计数，设备本身可以在此释放
    let stream = Stream::with_buffers(&device, Type::VideoCapture, CAPTURE_BUFFERS)
      .map_err(|e| camera_error(device_path, e))?;

    info!(
      "摄像头已打开: {} ({}x{})",
      device_path, format.width, format.height
    );

    Ok(Self {
      stream,
      frame_index: 0,
      width: format.width,
      height: format.height,
      start_time: Instant::now(),
    })
  }

  /// 将 YUYV 格式转换为 RGB
  fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Vec<u8> {
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);

    for chunk in yuyv.chunks_exact(4) {
      let y0 = chunk[0] as f32;
      let u = chunk[1] as f32 - 128.0;
      let y1 = chunk[2] as f32;
      let v = chunk[3] as f32 - 128.0;

      for y in [y0, y1] {
        let r = (y + 1.402 * v).clamp(0.0, 255.0) as u8;
        let g = (y - 0.344 * u - 0.714 * v).clamp(0.0, 255.0) as u8;
        let b = (y + 1.772 * u).clamp(0.0, 255.0) as u8;
        rgb.extend_from_slice(&[r, g, b]);
      }
    }

    rgb
  }
}

impl Iterator for V4l2Source {
  type Item = Result<Frame, InputError>;

  fn next(&mut self) -> Option<Self::Item> {
    let (buffer, _meta) = match self.stream.next() {
      Ok(captured) => captured,
      Err(e) => return Some(Err(InputError::Camera(format!("无法捕获帧: {}", e)))),
    };

    let rgb_data = Self::yuyv_to_rgb(buffer, self.width, self.height);
    let Some(image) = RgbImage::from_raw(self.width, self.height, rgb_data) else {
      return Some(Err(InputError::Camera("无法创建 RGB 图像".to_string())));
    };

    let frame = Frame {
      image: DynamicImage::ImageRgb8(image),
      index: self.frame_index,
      timestamp_ms: self.start_time.elapsed().as_millis() as u64,
    };
    self.frame_index += 1;
    Some(Ok(frame))
  }
}
