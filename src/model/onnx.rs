// 该文件是 yolo-ha 项目的一部分。
// src/model/onnx.rs - ONNX Runtime 推理后端
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

use std::path::Path;

use ort::{session::Session, value::Tensor};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

use crate::{
  FromUrl, FromUrlWithScheme,
  letterbox::LetterboxedTensor,
  model::{
    Backend, RawDetection,
    yolo::{self, COCO_CLASS_COUNT, YoloDecodeError, YoloFormat, YoloLayout},
  },
};

#[derive(Error, Debug)]
pub enum OnnxBackendError {
  #[error("模型加载错误: {0}")]
  ModelLoadError(String),
  #[error("ONNX Runtime 错误: {0}")]
  RuntimeError(String),
  #[error("模型输出解码错误: {0}")]
  DecodeError(#[from] YoloDecodeError),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
}

/// 以 ONNX 模型作为推理后端，输入为 NCHW 的 letterbox 张量
pub struct OnnxBackend {
  session: Session,
  classes: usize,
  format: Option<YoloFormat>,
}

impl OnnxBackend {
  pub fn from_path(path: impl AsRef<Path>) -> Result<Self, OnnxBackendError> {
    let path = path.as_ref();
    info!("加载模型文件: {}", path.display());

    let session = Session::builder()
      .and_then(|builder| builder.commit_from_file(path))
      .map_err(|e| OnnxBackendError::ModelLoadError(format!("{}: {}", path.display(), e)))?;
    info!("模型加载完成");

    Ok(Self {
      session,
      classes: COCO_CLASS_COUNT,
      format: None,
    })
  }

  /// 模型类别数，未指定排布时据此识别输出布局
  pub fn with_classes(mut self, classes: usize) -> Self {
    self.classes = classes;
    self
  }

  /// 显式指定输出排布
  pub fn with_format(mut self, format: YoloFormat) -> Self {
    self.format = Some(format);
    self
  }

  fn layout(
    format: Option<YoloFormat>,
    classes: usize,
    shape: &[i64],
  ) -> Result<YoloLayout, YoloDecodeError> {
    match format {
      Some(format) => YoloLayout::new(format, shape),
      None => YoloLayout::with_classes(shape, classes),
    }
  }
}

impl FromUrlWithScheme for OnnxBackend {
  const SCHEME: &'static str = "onnx";
}

impl FromUrl for OnnxBackend {
  type Error = OnnxBackendError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(OnnxBackendError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Self::from_path(url.path())
  }
}

impl Backend for OnnxBackend {
  type Error = OnnxBackendError;

  fn infer(
    &mut self,
    input: &LetterboxedTensor,
    min_score: f32,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    let runtime = |e: ort::Error| OnnxBackendError::RuntimeError(e.to_string());

    let tensor = Tensor::from_array(input.to_nchw()).map_err(runtime)?;
    let outputs = self.session.run(ort::inputs![tensor]).map_err(runtime)?;
    let (shape, data) = outputs[0].try_extract_tensor::<f32>().map_err(runtime)?;
    let shape = shape.to_vec();
    debug!("模型输出形状: {:?}", shape);

    let layout = Self::layout(self.format, self.classes, &shape)?;
    Ok(yolo::decode(layout, data, min_score)?)
  }
}
