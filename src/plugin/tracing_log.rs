// 该文件是 yolo-ha 项目的一部分。
// src/plugin/tracing_log.rs - 日志插件
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

use tracing::info;

use crate::{
  model::Detection,
  plugin::{DispatchError, NotifyPlugin, PluginConfig},
};

/// 只把通知写入日志
#[derive(Debug, Default)]
pub struct TracingPlugin {
  images: usize,
}

impl TracingPlugin {
  pub const ID: &'static str = "log.Tracing";

  pub fn from_config(_config: &PluginConfig) -> Result<Self, String> {
    Ok(Self::default())
  }
}

impl NotifyPlugin for TracingPlugin {
  fn publish_detection(&mut self, label: &str, score: f32) -> Result<(), DispatchError> {
    info!("检测到 {}: {:.2}%", label, score * 100.0);
    Ok(())
  }

  fn publish_detections(&mut self, detections: &[Detection]) -> Result<(), DispatchError> {
    for det in detections {
      info!(
        "  - {}: {:.2}% at ({:.0}, {:.0}, {:.0}x{:.0})",
        det.label,
        det.score * 100.0,
        det.bbox.x,
        det.bbox.y,
        det.bbox.width,
        det.bbox.height
      );
    }
    Ok(())
  }

  fn publish_image(&mut self, png: &[u8]) -> Result<(), DispatchError> {
    self.images += 1;
    info!("标注图像: {} 字节", png.len());
    Ok(())
  }

  fn release(&mut self) -> Result<(), DispatchError> {
    info!("日志插件释放，共收到 {} 张图像", self.images);
    Ok(())
  }
}
