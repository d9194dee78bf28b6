// 该文件是 yolo-ha 项目的一部分。
// src/model/result.rs - 检测结果
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

use serde::{Deserialize, Serialize};

/// 原图像素坐标下的边界框
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
  /// 左上角 x 坐标
  pub x: f32,
  /// 左上角 y 坐标
  pub y: f32,
  pub width: f32,
  pub height: f32,
}

/// 检测结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  /// 类别名称
  pub label: String,
  /// 置信度
  pub score: f32,
  pub bbox: BoundingBox,
}

/// 最高分检测；没有检测时 label 为空、score 为 0
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TopDetection<'a> {
  pub label: Option<&'a str>,
  pub score: f32,
}

impl TopDetection<'static> {
  pub const NONE: Self = TopDetection {
    label: None,
    score: 0.0,
  };
}

/// 按分数降序排列的检测序列
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DetectResult {
  items: Vec<Detection>,
}

impl DetectResult {
  /// 稳定排序：分数相同的检测保持原有顺序
  pub fn new(mut items: Vec<Detection>) -> Self {
    items.sort_by(|a, b| b.score.total_cmp(&a.score));
    Self { items }
  }

  pub fn top(&self) -> TopDetection<'_> {
    self
      .items
      .first()
      .map(|det| TopDetection {
        label: Some(det.label.as_str()),
        score: det.score,
      })
      .unwrap_or(TopDetection::NONE)
  }

  /// 最高分严格大于 0 时才值得通知
  pub fn is_actionable(&self) -> bool {
    self.top().score > 0.0
  }

  pub fn items(&self) -> &[Detection] {
    &self.items
  }

  pub fn iter(&self) -> std::slice::Iter<'_, Detection> {
    self.items.iter()
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl<'a> IntoIterator for &'a DetectResult {
  type Item = &'a Detection;
  type IntoIter = std::slice::Iter<'a, Detection>;

  fn into_iter(self) -> Self::IntoIter {
    self.items.iter()
  }
}
