// 该文件是 yolo-ha 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use ab_glyph::{FontArc, PxScale};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;

use crate::model::{DetectResult, Detection, labels::COCO_CLASSES};

const LABEL_FONT_SIZE: f32 = 16.0;
const LABEL_TEXT_HEIGHT: i32 = 20;
const LABEL_CHAR_WIDTH: f32 = 9.0; // 每字符平均宽度（粗略估计）
const TIMING_FONT_SIZE: f32 = 15.0;
const TIMING_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const TEXT_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// 在图像上绘制检测框、标签与推理耗时
pub struct Draw {
  font: FontArc,
  label_scale: PxScale,
  timing_scale: PxScale,
  colors: Vec<Rgb<u8>>,
}

impl Default for Draw {
  fn default() -> Self {
    let font_data = include_bytes!("../../assets/DejaVuSans.ttf");
    let font = FontArc::try_from_slice(font_data).expect("无法加载嵌入的字体文件");

    // 每个 COCO 类别一种颜色
    let colors = (0..COCO_CLASSES.len())
      .map(|i| hsv_to_rgb(i as f32 / COCO_CLASSES.len() as f32 * 360.0, 0.8, 0.9))
      .collect();

    Self {
      font,
      label_scale: PxScale::from(LABEL_FONT_SIZE),
      timing_scale: PxScale::from(TIMING_FONT_SIZE),
      colors,
    }
  }
}

fn hsv_to_rgb(h: f32, s: f32, v: f32) -> Rgb<u8> {
  let c = v * s;
  let x = c * (1.0 - ((h / 60.0) % 2.0 - 1.0).abs());
  let m = v - c;

  let (r, g, b) = match h {
    h if h < 60.0 => (c, x, 0.0),
    h if h < 120.0 => (x, c, 0.0),
    h if h < 180.0 => (0.0, c, x),
    h if h < 240.0 => (0.0, x, c),
    h if h < 300.0 => (x, 0.0, c),
    _ => (c, 0.0, x),
  };

  Rgb([
    ((r + m) * 255.0) as u8,
    ((g + m) * 255.0) as u8,
    ((b + m) * 255.0) as u8,
  ])
}

impl Draw {
  fn color_of(&self, label: &str) -> Rgb<u8> {
    let index = COCO_CLASSES
      .iter()
      .position(|name| *name == label)
      .unwrap_or_else(|| label.bytes().map(usize::from).sum());
    self.colors[index % self.colors.len()]
  }

  /// 生成标注后的 RGB 图像，原图不变
  pub fn annotate(
    &self,
    image: &DynamicImage,
    result: &DetectResult,
    inference_time_ms: f64,
  ) -> RgbImage {
    let mut canvas = image.to_rgb8();
    for detection in result {
      self.draw_detection(&mut canvas, detection);
    }
    self.draw_inference_time(&mut canvas, inference_time_ms);
    canvas
  }

  fn draw_detection(&self, image: &mut RgbImage, detection: &Detection) {
    let (img_w, img_h) = (image.width() as i32, image.height() as i32);
    let bbox = &detection.bbox;

    let x = (bbox.x.floor() as i32).clamp(0, img_w - 1);
    let y = (bbox.y.floor() as i32).clamp(0, img_h - 1);
    let width = (bbox.width.ceil() as i32).min(img_w - x);
    let height = (bbox.height.ceil() as i32).min(img_h - y);
    if width <= 0 || height <= 0 {
      return;
    }

    let color = self.color_of(&detection.label);

    // 边框加粗为 2 像素
    draw_hollow_rect_mut(image, Rect::at(x, y).of_size(width as u32, height as u32), color);
    if width > 2 && height > 2 {
      let inner = Rect::at(x + 1, y + 1).of_size(width as u32 - 2, height as u32 - 2);
      draw_hollow_rect_mut(image, inner, color);
    }

    let label = format!("{} {:.2}", detection.label, detection.score);
    let text_width = ((label.chars().count() as f32 * LABEL_CHAR_WIDTH) as i32).min(img_w - x);
    let label_y = (y - LABEL_TEXT_HEIGHT).max(0);
    if text_width > 0 {
      let rect = Rect::at(x, label_y).of_size(text_width as u32, LABEL_TEXT_HEIGHT as u32);
      draw_filled_rect_mut(image, rect, color);
      draw_text_mut(
        image,
        TEXT_COLOR,
        x,
        label_y + 2,
        self.label_scale,
        &self.font,
        &label,
      );
    }
  }

  fn draw_inference_time(&self, image: &mut RgbImage, inference_time_ms: f64) {
    let text = format!("Inference time: {:.2} ms", inference_time_ms);
    draw_text_mut(image, TIMING_COLOR, 0, 0, self.timing_scale, &self.font, &text);
  }
}
