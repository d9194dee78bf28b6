// 该文件是 yolo-ha 项目的一部分。
// src/args.rs - 命令行参数
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

use clap::Parser;
use tracing::info;

use yolo_ha::{
  config::{ConfigError, ConfigFile},
  model::{DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_NET_SIZE, DEFAULT_NMS_THRESHOLD},
  plugin::{DEFAULT_PLUGIN, PluginConfig},
};

/// 目标检测并通过插件通知家庭自动化系统
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入来源：`0` 为默认摄像头，也可以是 /dev/videoN、图片路径或 image:///path
  #[arg(short = 'v', long = "video", value_name = "URI", default_value = "0")]
  pub video: String,

  /// 通知插件 `module.symbol`
  #[arg(short = 'p', long = "plugin", value_name = "MODULE.SYMBOL", default_value = DEFAULT_PLUGIN)]
  pub plugin: String,

  /// 显示标注后的图像（写入临时目录的预览文件）
  #[arg(short = 's', long = "show")]
  pub show: bool,

  /// 检测到目标时把标注图保存到当前目录
  #[arg(short = 'd', long = "save")]
  pub save: bool,

  /// YAML 配置文件
  #[arg(short = 'c', long = "config", value_name = "FILE")]
  pub config: Option<PathBuf>,

  /// ONNX 模型文件路径
  #[arg(short = 'm', long = "model", value_name = "FILE", default_value = "yolov3.onnx")]
  pub model: PathBuf,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD)]
  pub confidence: f32,

  /// NMS IOU 阈值 (0.0 - 1.0)
  #[arg(long, value_name = "THRESHOLD", default_value_t = DEFAULT_NMS_THRESHOLD)]
  pub nms: f32,

  /// 网络输入边长
  #[arg(long, value_name = "PIXELS", default_value_t = DEFAULT_NET_SIZE)]
  pub net_size: u32,

  /// 摄像头模式下的最大处理帧数
  #[arg(long, value_name = "COUNT")]
  pub frames: Option<usize>,
}

/// 合并命令行与配置文件后的运行参数
#[derive(Debug)]
pub struct Settings {
  pub video: String,
  pub plugin: String,
  pub plugin_config: PluginConfig,
  pub show: bool,
  pub save: bool,
  pub model: PathBuf,
  pub confidence: f32,
  pub nms: f32,
  pub net_size: u32,
  pub frames: Option<usize>,
}

impl Args {
  /// 读取 `-c` 指定的配置，`cvconf` 中的值覆盖命令行
  pub fn resolve(self) -> Result<Settings, ConfigError> {
    let config = self.config.as_ref().map(ConfigFile::load).transpose()?;
    let settings = self.merge(config)?;
    info!("输入来源: {}", settings.video);
    info!("通知插件: {}", settings.plugin);
    Ok(settings)
  }

  fn merge(self, config: Option<ConfigFile>) -> Result<Settings, ConfigError> {
    for (flag, value) in [("--confidence", self.confidence), ("--nms", self.nms)] {
      if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::Invalid(format!(
          "{} 必须位于 [0, 1]，实际为 {}",
          flag, value
        )));
      }
    }
    if self.net_size == 0 {
      return Err(ConfigError::Invalid("--net-size 必须大于 0".to_string()));
    }

    let mut settings = Settings {
      video: self.video,
      plugin: self.plugin,
      plugin_config: PluginConfig::default(),
      show: self.show,
      save: self.save,
      model: self.model,
      confidence: self.confidence,
      nms: self.nms,
      net_size: self.net_size,
      frames: self.frames,
    };

    if let Some(config) = config {
      settings.plugin_config = config.plugin_config();
      let cvconf = config.cvconf;
      settings.plugin = cvconf.plugin;
      settings.video = cvconf.video;
      if let Some(model) = cvconf.model {
        settings.model = model;
      }
      if let Some(confidence) = cvconf.confidence {
        settings.confidence = confidence;
      }
      if let Some(nms) = cvconf.nms {
        settings.nms = nms;
      }
    }

    Ok(settings)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults() {
    let settings = Args::parse_from(["yolo-ha"]).resolve().unwrap();
    assert_eq!(settings.video, "0");
    assert_eq!(settings.plugin, "bus.JsonBus");
    assert!(!settings.show && !settings.save);
    assert_eq!(settings.confidence, 0.5);
    assert_eq!(settings.nms, 0.4);
    assert_eq!(settings.net_size, 416);
    assert_eq!(settings.frames, None);
  }

  #[test]
  fn test_short_flags() {
    let args = Args::parse_from(["yolo-ha", "-v", "door.jpg", "-p", "log.Tracing", "-s", "-d"]);
    assert_eq!(args.video, "door.jpg");
    assert_eq!(args.plugin, "log.Tracing");
    assert!(args.show && args.save);
  }

  #[test]
  fn test_config_overrides_flags() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cv.yaml");
    std::fs::write(
      &path,
      "cvconf:\n  plugin: folder.Record\n  video: /tmp/yard.png\n  nms: 0.3\nfolder:\n  path: /tmp/rec\n",
    )
    .unwrap();

    let args = Args::parse_from([
      "yolo-ha",
      "-v",
      "door.jpg",
      "-p",
      "log.Tracing",
      "-c",
      path.to_str().unwrap(),
    ]);
    let settings = args.resolve().unwrap();
    assert_eq!(settings.plugin, "folder.Record");
    assert_eq!(settings.video, "/tmp/yard.png");
    assert_eq!(settings.nms, 0.3);
    assert_eq!(settings.confidence, 0.5);
    assert!(settings.plugin_config.get("folder").is_some());
  }

  #[test]
  fn test_bad_arguments() {
    assert!(Args::try_parse_from(["yolo-ha", "-x"]).is_err());

    let err = Args::parse_from(["yolo-ha", "--confidence", "1.5"]).resolve().unwrap_err();
    assert!(matches!(err, ConfigError::Invalid(_)));

    let err = Args::parse_from(["yolo-ha", "-c", "/nonexistent/cv.yaml"]).resolve().unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
  }
}
