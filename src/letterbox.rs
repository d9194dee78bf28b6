// 该文件是 yolo-ha 项目的一部分。
// src/letterbox.rs - 信箱式缩放（letterbox）预处理
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

use image::{
  DynamicImage,
  imageops::{self, FilterType},
};
use ndarray::{Array3, Array4, Axis};
use thiserror::Error;

/// 填充区域使用的中性灰
pub const PAD_VALUE: f32 = 0.5;

const RGB_CHANNELS: usize = 3;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LetterboxError {
  #[error("图像尺寸无效: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("图像通道数不足: 至少需要 3 个, 实际 {0} 个")]
  TooFewChannels(u8),
  #[error("网络输入尺寸无效: {net_w}x{net_h}")]
  InvalidTarget { net_w: u32, net_h: u32 },
}

/// letterbox 几何参数，用于把网络坐标还原回原图坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LetterboxGeometry {
  pub src_w: u32,
  pub src_h: u32,
  pub net_w: u32,
  pub net_h: u32,
  /// 缩放后内容区域宽度
  pub new_w: u32,
  /// 缩放后内容区域高度
  pub new_h: u32,
  pub offset_x: u32,
  pub offset_y: u32,
}

impl LetterboxGeometry {
  /// 计算缩放尺寸与偏移。
  ///
  /// 比较 `net_w / W` 与 `net_h / H` 时使用交叉相乘。缩放后的非整数尺寸直接截断，
  /// 偏移量则由未截断的精确尺寸 `(net - exact) / 2` 向下取整得到，
  /// 因此截断损失的像素落在右侧/下方，内容略偏向左上。
  pub fn compute(src_w: u32, src_h: u32, net_w: u32, net_h: u32) -> Result<Self, LetterboxError> {
    if src_w == 0 || src_h == 0 {
      return Err(LetterboxError::EmptyImage {
        width: src_w,
        height: src_h,
      });
    }
    if net_w == 0 || net_h == 0 {
      return Err(LetterboxError::InvalidTarget { net_w, net_h });
    }

    let (w, h) = (src_w as u64, src_h as u64);
    let (nw, nh) = (net_w as u64, net_h as u64);

    let (new_w, new_h, offset_x, offset_y) = if nw * h < nh * w {
      // 宽度受限，精确高度为 h * nw / w
      (net_w, (h * nw / w) as u32, 0, ((nh * w - h * nw) / (2 * w)) as u32)
    } else {
      // 高度受限，精确宽度为 w * nh / h
      ((w * nh / h) as u32, net_h, ((nw * h - w * nh) / (2 * h)) as u32, 0)
    };

    // 极端长宽比下截断可能得到 0
    let new_w = new_w.max(1);
    let new_h = new_h.max(1);

    Ok(Self {
      src_w,
      src_h,
      net_w,
      net_h,
      new_w,
      new_h,
      offset_x,
      offset_y,
    })
  }

  pub fn scale_x(&self) -> f32 {
    self.new_w as f32 / self.src_w as f32
  }

  pub fn scale_y(&self) -> f32 {
    self.new_h as f32 / self.src_h as f32
  }

  /// (上, 下, 左, 右) 填充像素数
  pub fn padding(&self) -> (u32, u32, u32, u32) {
    let top = self.offset_y;
    let left = self.offset_x;
    (
      top,
      self.net_h - self.new_h - top,
      left,
      self.net_w - self.new_w - left,
    )
  }

  /// 网络输入坐标 -> 原图坐标
  pub fn to_source(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.offset_x as f32) / self.scale_x(),
      (y - self.offset_y as f32) / self.scale_y(),
    )
  }
}

/// 模型输入张量，形状为 (1, net_h, net_w, 3)，RGB 顺序，取值 [0, 1]
#[derive(Debug, Clone)]
pub struct LetterboxedTensor {
  data: Array4<f32>,
  geometry: LetterboxGeometry,
}

impl LetterboxedTensor {
  pub fn as_nhwc(&self) -> &Array4<f32> {
    &self.data
  }

  /// 转换为 (1, 3, net_h, net_w) 的连续内存布局
  pub fn to_nchw(&self) -> Array4<f32> {
    self
      .data
      .view()
      .permuted_axes([0, 3, 1, 2])
      .as_standard_layout()
      .into_owned()
  }

  pub fn geometry(&self) -> &LetterboxGeometry {
    &self.geometry
  }

  pub fn shape(&self) -> &[usize] {
    self.data.shape()
  }
}

/// 保持长宽比缩放图像并居中填充到 `net_h` x `net_w`。
///
/// 缩放使用双线性插值，空白区域填充 [`PAD_VALUE`]。
pub fn letterbox(
  image: &DynamicImage,
  net_h: u32,
  net_w: u32,
) -> Result<LetterboxedTensor, LetterboxError> {
  let geometry = LetterboxGeometry::compute(image.width(), image.height(), net_w, net_h)?;

  let channels = image.color().channel_count();
  if (channels as usize) < RGB_CHANNELS {
    return Err(LetterboxError::TooFewChannels(channels));
  }

  // 归一化到 [0, 1] 后再缩放
  let rgb = image.to_rgb32f();
  let resized = imageops::resize(&rgb, geometry.new_w, geometry.new_h, FilterType::Triangle);

  let mut canvas = Array3::<f32>::from_elem(
    (net_h as usize, net_w as usize, RGB_CHANNELS),
    PAD_VALUE,
  );

  let offset_x = geometry.offset_x as usize;
  let offset_y = geometry.offset_y as usize;
  for (x, y, pixel) in resized.enumerate_pixels() {
    let row = offset_y + y as usize;
    let col = offset_x + x as usize;
    for c in 0..RGB_CHANNELS {
      canvas[[row, col, c]] = pixel[c];
    }
  }

  Ok(LetterboxedTensor {
    data: canvas.insert_axis(Axis(0)),
    geometry,
  })
}

#[cfg(test)]
mod tests {
  use super::*;
  use image::{GrayImage, ImageBuffer, LumaA, Rgb, RgbImage, Rgba, RgbaImage};

  fn gradient(width: u32, height: u32) -> DynamicImage {
    DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
      Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    }))
  }

  #[test]
  fn test_vga_into_416() {
    let image = DynamicImage::ImageRgb8(RgbImage::new(640, 480));
    let tensor = letterbox(&image, 416, 416).unwrap();
    let geometry = tensor.geometry();

    assert_eq!((geometry.new_w, geometry.new_h), (416, 312));
    assert_eq!((geometry.offset_x, geometry.offset_y), (0, 52));
    assert_eq!(geometry.padding(), (52, 52, 0, 0));
    assert_eq!(tensor.shape(), &[1, 416, 416, 3]);

    let data = tensor.as_nhwc();
    assert_eq!(data[[0, 0, 0, 0]], PAD_VALUE);
    assert_eq!(data[[0, 51, 200, 2]], PAD_VALUE);
    assert_eq!(data[[0, 52, 0, 0]], 0.0);
    assert_eq!(data[[0, 363, 415, 1]], 0.0);
    assert_eq!(data[[0, 364, 0, 0]], PAD_VALUE);
    assert_eq!(data[[0, 415, 415, 2]], PAD_VALUE);
  }

  #[test]
  fn test_matching_aspect_has_no_padding() {
    for (w, h, net_w, net_h) in [(832, 832, 416, 416), (800, 600, 400, 300), (320, 240, 640, 480)] {
      let geometry = LetterboxGeometry::compute(w, h, net_w, net_h).unwrap();
      assert_eq!(geometry.padding(), (0, 0, 0, 0), "{w}x{h} -> {net_w}x{net_h}");
      assert_eq!((geometry.new_w, geometry.new_h), (net_w, net_h));
    }

    let tensor = letterbox(&gradient(800, 600), 300, 400).unwrap();
    assert_eq!(tensor.geometry().padding(), (0, 0, 0, 0));
    assert_eq!(tensor.shape(), &[1, 300, 400, 3]);
  }

  #[test]
  fn test_content_keeps_aspect_ratio() {
    let sizes = [
      (640, 480),
      (480, 640),
      (1920, 1080),
      (1000, 3),
      (3, 1000),
      (417, 415),
      (123, 457),
      (1, 1),
    ];
    for (w, h) in sizes {
      for (net_w, net_h) in [(416, 416), (640, 384), (320, 512)] {
        let g = LetterboxGeometry::compute(w, h, net_w, net_h).unwrap();
        assert!(g.new_w <= net_w && g.new_h <= net_h);
        assert!(g.new_w == net_w || g.new_h == net_h);

        // 还原后的内容区域长宽比与原图误差不超过 1 像素
        let expected_h = g.new_w as f64 * h as f64 / w as f64;
        let expected_w = g.new_h as f64 * w as f64 / h as f64;
        assert!(
          (g.new_h as f64 - expected_h).abs() <= 1.0 || (g.new_w as f64 - expected_w).abs() <= 1.0,
          "{w}x{h} -> {net_w}x{net_h}: {g:?}"
        );
      }
    }
  }

  #[test]
  fn test_truncates_scaled_dimension() {
    // 500 * 416 / 333 = 624.6... -> 高度受限, 宽度截断为 624
    let g = LetterboxGeometry::compute(500, 333, 640, 416).unwrap();
    // 精确宽度 624.6..., 左侧偏移 floor(15.3.../2) = 7
    assert_eq!((g.new_w, g.new_h), (624, 416));
    assert_eq!((g.offset_x, g.offset_y), (7, 0));
    assert_eq!(g.padding(), (0, 0, 7, 9));

    // 精确高度 212.16, 上方偏移 floor(203.84/2) = 101
    let g = LetterboxGeometry::compute(100, 51, 416, 416).unwrap();
    assert_eq!((g.new_w, g.new_h), (416, 212));
    assert_eq!((g.offset_x, g.offset_y), (0, 101));
    assert_eq!(g.padding(), (101, 103, 0, 0));

    // 奇数剩余像素多出的一行落在下方
    let g = LetterboxGeometry::compute(100, 50, 416, 415).unwrap();
    assert_eq!((g.new_w, g.new_h), (416, 208));
    assert_eq!(g.padding(), (103, 104, 0, 0));
  }

  #[test]
  fn test_idempotent() {
    let image = gradient(97, 61);
    let a = letterbox(&image, 416, 416).unwrap();
    let b = letterbox(&image, 416, 416).unwrap();
    assert_eq!(a.as_nhwc(), b.as_nhwc());
    assert_eq!(a.geometry(), b.geometry());
  }

  #[test]
  fn test_normalized_rgb_values() {
    let red = DynamicImage::ImageRgba8(RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 7])));
    let tensor = letterbox(&red, 4, 4).unwrap();
    let data = tensor.as_nhwc();
    assert!((data[[0, 1, 1, 0]] - 1.0).abs() < 1e-6);
    assert!(data[[0, 1, 1, 1]].abs() < 1e-6);
    assert!(data[[0, 1, 1, 2]].abs() < 1e-6);
  }

  #[test]
  fn test_nchw_layout() {
    let tensor = letterbox(&gradient(32, 16), 16, 16).unwrap();
    let nchw = tensor.to_nchw();
    assert_eq!(nchw.shape(), &[1, 3, 16, 16]);
    assert_eq!(nchw[[0, 2, 5, 7]], tensor.as_nhwc()[[0, 5, 7, 2]]);
  }

  #[test]
  fn test_rejects_invalid_images() {
    let empty = DynamicImage::ImageRgb8(RgbImage::new(0, 10));
    assert_eq!(
      letterbox(&empty, 416, 416).unwrap_err(),
      LetterboxError::EmptyImage {
        width: 0,
        height: 10
      }
    );

    let gray = DynamicImage::ImageLuma8(GrayImage::new(8, 8));
    assert_eq!(
      letterbox(&gray, 416, 416).unwrap_err(),
      LetterboxError::TooFewChannels(1)
    );

    let gray_alpha = DynamicImage::ImageLumaA8(ImageBuffer::from_pixel(8, 8, LumaA([0u8, 255])));
    assert_eq!(
      letterbox(&gray_alpha, 416, 416).unwrap_err(),
      LetterboxError::TooFewChannels(2)
    );

    assert_eq!(
      letterbox(&gradient(8, 8), 0, 416).unwrap_err(),
      LetterboxError::InvalidTarget {
        net_w: 416,
        net_h: 0
      }
    );
  }

  #[test]
  fn test_to_source_inverts_geometry() {
    let g = LetterboxGeometry::compute(640, 480, 416, 416).unwrap();
    let (x, y) = g.to_source(208.0, 208.0);
    assert!((x - 320.0).abs() < 1e-3);
    assert!((y - 240.0).abs() < 1e-3);

    let (x, y) = g.to_source(0.0, 52.0);
    assert!(x.abs() < 1e-3 && y.abs() < 1e-3);
  }
}
