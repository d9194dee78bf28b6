// 该文件是 yolo-ha 项目的一部分。
// src/plugin/json_bus.rs - JSON 消息总线插件
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

use std::{
  fs::File,
  io::{self, BufWriter, Write},
  path::PathBuf,
};

use base64::{Engine as _, engine::general_purpose};
use chrono::Local;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, info};

use crate::{
  model::Detection,
  plugin::{DispatchError, NotifyPlugin, PluginConfig},
};

const DEFAULT_TOPIC: &str = "yolo-ha";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct JsonBusConfig {
  /// 主题前缀
  topic: Option<String>,
  /// 消息输出文件，缺省为标准输出
  output: Option<PathBuf>,
  /// 图像另存目录，消息中附带保存路径
  image_dir: Option<PathBuf>,
}

/// 每次通知写出一行 `{"topic": ..., "payload": ...}` 消息
pub struct JsonBusPlugin {
  topic: String,
  writer: Box<dyn Write>,
  image_dir: Option<PathBuf>,
  sent: u64,
}

impl JsonBusPlugin {
  pub const ID: &'static str = "bus.JsonBus";

  /// 读取配置中的 `bus` 节
  pub fn from_config(config: &PluginConfig) -> Result<Self, String> {
    let conf: JsonBusConfig = config.section("bus")?;

    let writer: Box<dyn Write> = match &conf.output {
      Some(path) => {
        let file = File::create(path).map_err(|e| format!("{}: {}", path.display(), e))?;
        Box::new(BufWriter::new(file))
      }
      None => Box::new(io::stdout()),
    };

    let topic = conf.topic.unwrap_or_else(|| DEFAULT_TOPIC.to_string());
    Ok(Self::with_writer(topic, writer).with_image_dir(conf.image_dir))
  }

  pub fn with_writer(topic: impl Into<String>, writer: Box<dyn Write>) -> Self {
    Self {
      topic: topic.into(),
      writer,
      image_dir: None,
      sent: 0,
    }
  }

  pub fn with_image_dir(mut self, image_dir: Option<PathBuf>) -> Self {
    self.image_dir = image_dir;
    self
  }

  fn send(&mut self, subtopic: &str, payload: Value) -> Result<(), DispatchError> {
    let topic = format!("{}/{}", self.topic, subtopic);
    let message = json!({ "topic": topic, "payload": payload });
    serde_json::to_writer(&mut self.writer, &message)?;
    self.writer.write_all(b"\n")?;
    self.writer.flush()?;
    self.sent += 1;
    debug!("消息已发送: {}", topic);
    Ok(())
  }
}

impl NotifyPlugin for JsonBusPlugin {
  fn publish_detection(&mut self, label: &str, score: f32) -> Result<(), DispatchError> {
    self.send("detection", json!({ "label": label, "score": score }))
  }

  fn publish_detections(&mut self, detections: &[Detection]) -> Result<(), DispatchError> {
    self.send("detections", serde_json::to_value(detections)?)
  }

  fn publish_image(&mut self, png: &[u8]) -> Result<(), DispatchError> {
    let path = match &self.image_dir {
      Some(dir) => {
        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!(
          "{}-{}.png",
          DEFAULT_TOPIC,
          Local::now().format("%Y%m%d-%H%M%S%.3f")
        ));
        std::fs::write(&path, png)?;
        Some(path.display().to_string())
      }
      None => None,
    };

    self.send(
      "image",
      json!({
        "format": "png",
        "size": png.len(),
        "data": general_purpose::STANDARD.encode(png),
        "path": path,
      }),
    )
  }

  fn release(&mut self) -> Result<(), DispatchError> {
    self.writer.flush()?;
    info!("消息总线关闭，共发送 {} 条消息", self.sent);
    Ok(())
  }
}
