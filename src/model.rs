// 该文件是 yolo-ha 项目的一部分。
// src/model.rs - 检测器适配层
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

use std::time::{Duration, Instant};

use image::DynamicImage;
use thiserror::Error;
use tracing::debug;

use crate::letterbox::{LetterboxError, LetterboxGeometry, LetterboxedTensor, letterbox};

pub mod labels;
mod result;
pub mod yolo;

#[cfg(feature = "model_onnx")]
mod onnx;
#[cfg(feature = "model_onnx")]
pub use self::onnx::{OnnxBackend, OnnxBackendError};

pub use self::result::{BoundingBox, DetectResult, Detection, TopDetection};

pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;
pub const DEFAULT_NMS_THRESHOLD: f32 = 0.4;
pub const DEFAULT_NET_SIZE: u32 = 416;

/// 推理后端的原始输出，坐标为网络输入像素 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, PartialEq)]
pub struct RawDetection {
  pub label: String,
  pub score: f32,
  pub bbox: [f32; 4],
}

impl RawDetection {
  pub fn new(label: impl Into<String>, score: f32, bbox: [f32; 4]) -> Self {
    Self {
      label: label.into(),
      score,
      bbox,
    }
  }

  fn into_detection(self, geometry: &LetterboxGeometry) -> Detection {
    let (src_w, src_h) = (geometry.src_w as f32, geometry.src_h as f32);
    let (x_min, y_min) = geometry.to_source(self.bbox[0], self.bbox[1]);
    let (x_max, y_max) = geometry.to_source(self.bbox[2], self.bbox[3]);

    let x_min = x_min.clamp(0.0, src_w);
    let y_min = y_min.clamp(0.0, src_h);
    let x_max = x_max.clamp(0.0, src_w);
    let y_max = y_max.clamp(0.0, src_h);

    Detection {
      label: self.label,
      score: self.score,
      bbox: BoundingBox {
        x: x_min,
        y: y_min,
        width: (x_max - x_min).max(0.0),
        height: (y_max - y_min).max(0.0),
      },
    }
  }
}

/// 不透明的推理后端，只负责给出带标签和分数的候选框
pub trait Backend {
  type Error: std::error::Error + Send + Sync + 'static;

  /// `min_score` 仅作为提示，过滤与 NMS 由 [`Detector`] 负责
  fn infer(
    &mut self,
    input: &LetterboxedTensor,
    min_score: f32,
  ) -> Result<Vec<RawDetection>, Self::Error>;
}

#[derive(Error, Debug)]
pub enum DetectorError {
  #[error("无效图像: {0}")]
  InvalidImage(#[from] LetterboxError),
  #[error("推理后端错误: {0}")]
  Backend(Box<dyn std::error::Error + Send + Sync>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
  pub net_w: u32,
  pub net_h: u32,
  /// 置信度阈值
  pub confidence_threshold: f32,
  /// NMS IOU 阈值
  pub nms_threshold: f32,
}

impl Default for DetectorConfig {
  fn default() -> Self {
    Self {
      net_w: DEFAULT_NET_SIZE,
      net_h: DEFAULT_NET_SIZE,
      confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
    }
  }
}

/// 目标检测器
///
/// 内部完成 letterbox 预处理，返回的结果已过滤、已做 NMS，并按分数降序排列，
/// 坐标位于原图像素空间。
pub struct Detector<B> {
  backend: B,
  config: DetectorConfig,
  last_inference: Duration,
}

impl<B: Backend> Detector<B> {
  pub fn new(backend: B, config: DetectorConfig) -> Self {
    Self {
      backend,
      config,
      last_inference: Duration::ZERO,
    }
  }

  pub fn config(&self) -> &DetectorConfig {
    &self.config
  }

  /// 运行推理
  pub fn detect(&mut self, image: &DynamicImage) -> Result<DetectResult, DetectorError> {
    let tensor = letterbox(image, self.config.net_h, self.config.net_w)?;

    let now = Instant::now();
    let raw = self
      .backend
      .infer(&tensor, self.config.confidence_threshold)
      .map_err(|e| DetectorError::Backend(Box::new(e)))?;
    self.last_inference = now.elapsed();
    debug!(
      "后端返回 {} 个候选框，耗时: {:.2?}",
      raw.len(),
      self.last_inference
    );

    let threshold = self.config.confidence_threshold;
    let candidates = raw
      .into_iter()
      .filter(|det| det.score >= threshold)
      .collect::<Vec<_>>();

    let geometry = tensor.geometry();
    let items = non_max_suppression(candidates, self.config.nms_threshold)
      .into_iter()
      .map(|det| det.into_detection(geometry))
      .collect();

    Ok(DetectResult::new(items))
  }

  /// 上一次推理耗时（毫秒）
  pub fn last_inference_time_ms(&self) -> f64 {
    self.last_inference.as_secs_f64() * 1000.0
  }
}

/// 非极大值抑制
///
/// 按分数稳定降序排序，同一标签下与更高分框 IoU 大于阈值的框被移除。
pub fn non_max_suppression(mut detections: Vec<RawDetection>, nms_threshold: f32) -> Vec<RawDetection> {
  detections.sort_by(|a, b| b.score.total_cmp(&a.score));

  let mut suppressed = vec![false; detections.len()];
  for i in 0..detections.len() {
    if suppressed[i] {
      continue;
    }
    for j in (i + 1)..detections.len() {
      if suppressed[j] || detections[j].label != detections[i].label {
        continue;
      }
      if iou(&detections[i].bbox, &detections[j].bbox) > nms_threshold {
        suppressed[j] = true;
      }
    }
  }

  detections
    .into_iter()
    .zip(suppressed)
    .filter_map(|(det, suppressed)| (!suppressed).then_some(det))
    .collect()
}

/// 计算两个边界框的 IoU
pub fn iou(a: &[f32; 4], b: &[f32; 4]) -> f32 {
  let x1 = a[0].max(b[0]);
  let y1 = a[1].max(b[1]);
  let x2 = a[2].min(b[2]);
  let y2 = a[3].min(b[3]);

  let intersection = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
  let area_a = (a[2] - a[0]).max(0.0) * (a[3] - a[1]).max(0.0);
  let area_b = (b[2] - b[0]).max(0.0) * (b[3] - b[1]).max(0.0);
  let union = area_a + area_b - intersection;

  if union > 0.0 {
    intersection / union
  } else {
    0.0
  }
}
