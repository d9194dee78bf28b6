// 该文件是 yolo-ha 项目的一部分。
// src/config.rs - YAML 配置文件
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

use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_yaml::Mapping;
use thiserror::Error;
use tracing::debug;

use crate::plugin::{PluginConfig, PluginId};

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("无法读取配置文件 {path}: {source}")]
  Io {
    path: PathBuf,
    source: std::io::Error,
  },
  #[error("配置文件格式错误: {0}")]
  Parse(#[from] serde_yaml::Error),
  #[error("配置项无效: {0}")]
  Invalid(String),
}

/// `cvconf` 节
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CvConf {
  /// 插件标识 `module.symbol`
  pub plugin: String,
  /// 输入来源
  pub video: String,
  /// 模型文件路径
  #[serde(default)]
  pub model: Option<PathBuf>,
  /// 置信度阈值
  #[serde(default)]
  pub confidence: Option<f32>,
  /// NMS IOU 阈值
  #[serde(default)]
  pub nms: Option<f32>,
}

#[derive(Deserialize)]
struct CvConfSection {
  cvconf: CvConf,
}

/// 配置文件：`cvconf` 由核心解读，整个文档原样交给插件
#[derive(Debug, Clone)]
pub struct ConfigFile {
  pub cvconf: CvConf,
  pub document: Mapping,
}

impl ConfigFile {
  pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
      path: path.to_path_buf(),
      source,
    })?;
    let config = Self::parse(&content)?;
    debug!("配置文件已加载: {}", path.display());
    Ok(config)
  }

  pub fn parse(content: &str) -> Result<Self, ConfigError> {
    let value: serde_yaml::Value = serde_yaml::from_str(content)?;
    let CvConfSection { cvconf } = serde_yaml::from_value(value.clone())?;
    let document: Mapping = serde_yaml::from_value(value)?;
    let config = ConfigFile { cvconf, document };
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<(), ConfigError> {
    self
      .cvconf
      .plugin
      .parse::<PluginId>()
      .map_err(|e| ConfigError::Invalid(format!("cvconf.plugin: {}", e)))?;

    if self.cvconf.video.trim().is_empty() {
      return Err(ConfigError::Invalid("cvconf.video 不能为空".to_string()));
    }

    for (key, value) in [
      ("cvconf.confidence", self.cvconf.confidence),
      ("cvconf.nms", self.cvconf.nms),
    ] {
      if let Some(value) = value
        && !(0.0..=1.0).contains(&value)
      {
        return Err(ConfigError::Invalid(format!(
          "{} 必须位于 [0, 1]，实际为 {}",
          key, value
        )));
      }
    }

    Ok(())
  }

  pub fn plugin_config(&self) -> PluginConfig {
    PluginConfig::new(self.document.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  const SAMPLE: &str = r#"
cvconf:
  plugin: log.Tracing
  video: /tmp/front-door.jpg
  confidence: 0.6
bus:
  topic: home/front-door
"#;

  #[test]
  fn test_parse_config() {
    let config = ConfigFile::parse(SAMPLE).unwrap();
    assert_eq!(config.cvconf.plugin, "log.Tracing");
    assert_eq!(config.cvconf.video, "/tmp/front-door.jpg");
    assert_eq!(config.cvconf.confidence, Some(0.6));
    assert_eq!(config.cvconf.nms, None);

    // 插件拿到完整文档，包括 cvconf
    let plugin_config = config.plugin_config();
    assert!(plugin_config.get("bus").is_some());
    let cvconf = plugin_config.get("cvconf").unwrap();
    assert_eq!(cvconf["plugin"].as_str(), Some("log.Tracing"));
    assert_eq!(cvconf["video"].as_str(), Some("/tmp/front-door.jpg"));
  }

  #[test]
  fn test_rejects_unknown_and_missing_keys() {
    let unknown = "cvconf:\n  plugin: log.Tracing\n  video: '0'\n  colour: red\n";
    assert!(matches!(ConfigFile::parse(unknown), Err(ConfigError::Parse(_))));

    let missing = "cvconf:\n  video: '0'\n";
    assert!(matches!(ConfigFile::parse(missing), Err(ConfigError::Parse(_))));

    assert!(matches!(ConfigFile::parse("bus: {}\n"), Err(ConfigError::Parse(_))));
    assert!(matches!(ConfigFile::parse(": : :"), Err(ConfigError::Parse(_))));
  }

  #[test]
  fn test_rejects_invalid_values() {
    let bad_plugin = "cvconf:\n  plugin: nodot\n  video: '0'\n";
    assert!(matches!(ConfigFile::parse(bad_plugin), Err(ConfigError::Invalid(_))));

    let bad_threshold = "cvconf:\n  plugin: log.Tracing\n  video: '0'\n  nms: 1.5\n";
    assert!(matches!(ConfigFile::parse(bad_threshold), Err(ConfigError::Invalid(_))));
  }

  #[test]
  fn test_load_missing_file() {
    let dir = tempfile::tempdir().unwrap();
    let err = ConfigFile::load(dir.path().join("absent.yaml")).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
  }
}
