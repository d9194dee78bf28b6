// 该文件是 yolo-ha 项目的一部分。
// src/model/yolo.rs - YOLO 输出解码
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

use thiserror::Error;

use crate::model::{RawDetection, labels::coco_label};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum YoloDecodeError {
  #[error("模型输出形状无效: {0:?}")]
  InvalidShape(Vec<i64>),
  #[error("输出数据长度不匹配: 期望 {expected}, 实际 {actual}")]
  LengthMismatch { expected: usize, actual: usize },
}

/// COCO 模型的类别数
pub const COCO_CLASS_COUNT: usize = 80;

/// 输出张量的排布方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YoloFormat {
  /// [1, N, 5 + C]: cx, cy, w, h, objectness, 类别分数...（YOLOv3/v5）
  AnchorMajor,
  /// [1, 4 + C, N]: cx, cy, w, h, 类别分数...（YOLOv8 之后，无 objectness）
  FeatureMajor,
}

/// 模型输出布局
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YoloLayout {
  AnchorMajor { anchors: usize, classes: usize },
  FeatureMajor { anchors: usize, classes: usize },
}

fn batch_dims(shape: &[i64]) -> Result<(usize, usize), YoloDecodeError> {
  if shape.len() != 3 || shape[0] != 1 || shape.iter().any(|dim| *dim <= 0) {
    return Err(YoloDecodeError::InvalidShape(shape.to_vec()));
  }
  Ok((shape[1] as usize, shape[2] as usize))
}

impl YoloLayout {
  /// 按指定排布解释输出形状
  pub fn new(format: YoloFormat, shape: &[i64]) -> Result<Self, YoloDecodeError> {
    let (a, b) = batch_dims(shape)?;
    let invalid = || YoloDecodeError::InvalidShape(shape.to_vec());
    match format {
      YoloFormat::AnchorMajor => Ok(YoloLayout::AnchorMajor {
        anchors: a,
        classes: b.checked_sub(5).filter(|c| *c > 0).ok_or_else(invalid)?,
      }),
      YoloFormat::FeatureMajor => Ok(YoloLayout::FeatureMajor {
        anchors: b,
        classes: a.checked_sub(4).filter(|c| *c > 0).ok_or_else(invalid)?,
      }),
    }
  }

  /// 由已知类别数确定排布：特征维为 `5 + C` 时按锚点优先，为 `4 + C` 时按特征优先
  pub fn with_classes(shape: &[i64], classes: usize) -> Result<Self, YoloDecodeError> {
    let (a, b) = batch_dims(shape)?;
    if classes > 0 && b == 5 + classes {
      Self::new(YoloFormat::AnchorMajor, shape)
    } else if classes > 0 && a == 4 + classes {
      Self::new(YoloFormat::FeatureMajor, shape)
    } else {
      Err(YoloDecodeError::InvalidShape(shape.to_vec()))
    }
  }

  fn len(&self) -> usize {
    match *self {
      YoloLayout::AnchorMajor { anchors, classes } => anchors * (5 + classes),
      YoloLayout::FeatureMajor { anchors, classes } => anchors * (4 + classes),
    }
  }
}

fn best_class(scores: impl Iterator<Item = f32>) -> (usize, f32) {
  scores
    .enumerate()
    .fold((0, 0.0f32), |best, (class_id, score)| {
      if score > best.1 { (class_id, score) } else { best }
    })
}

fn to_raw(cx: f32, cy: f32, w: f32, h: f32, class_id: usize, score: f32) -> RawDetection {
  RawDetection::new(
    coco_label(class_id),
    score,
    [cx - w / 2.0, cy - h / 2.0, cx + w / 2.0, cy + h / 2.0],
  )
}

/// 解码 YOLO 输出张量，坐标为网络输入像素
pub fn decode(
  layout: YoloLayout,
  data: &[f32],
  min_score: f32,
) -> Result<Vec<RawDetection>, YoloDecodeError> {
  let expected = layout.len();
  if data.len() != expected {
    return Err(YoloDecodeError::LengthMismatch {
      expected,
      actual: data.len(),
    });
  }

  let mut detections = Vec::new();
  match layout {
    YoloLayout::AnchorMajor { classes, .. } => {
      for row in data.chunks_exact(5 + classes) {
        let objectness = row[4];
        if objectness < min_score {
          continue;
        }

        let (class_id, class_score) = best_class(row[5..].iter().copied());
        let score = objectness * class_score;
        if score < min_score {
          continue;
        }

        detections.push(to_raw(row[0], row[1], row[2], row[3], class_id, score));
      }
    }
    YoloLayout::FeatureMajor { anchors, classes } => {
      let at = |feature: usize, anchor: usize| data[feature * anchors + anchor];
      for anchor in 0..anchors {
        let (class_id, score) = best_class((0..classes).map(|c| at(4 + c, anchor)));
        if score < min_score {
          continue;
        }

        detections.push(to_raw(
          at(0, anchor),
          at(1, anchor),
          at(2, anchor),
          at(3, anchor),
          class_id,
          score,
        ));
      }
    }
  }

  Ok(detections)
}
