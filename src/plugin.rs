// 该文件是 yolo-ha 项目的一部分。
// src/plugin.rs - 通知插件协议
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

use std::{collections::BTreeMap, fmt, str::FromStr};

use serde::de::DeserializeOwned;
use serde_yaml::{Mapping, Value};
use thiserror::Error;
use tracing::{info, warn};

use crate::model::{DetectResult, Detection};

mod json_bus;
mod record;
mod tracing_log;

pub use self::json_bus::JsonBusPlugin;
pub use self::record::RecordPlugin;
pub use self::tracing_log::TracingPlugin;

pub const DEFAULT_PLUGIN: &str = "bus.JsonBus";

#[derive(Error, Debug)]
pub enum PluginError {
  #[error("插件标识无效: '{0}'，应为 <module>.<symbol>")]
  MalformedId(String),
  #[error("找不到插件: {0}")]
  Unknown(PluginId),
  #[error("插件 {id} 构造失败: {reason}")]
  Construct { id: PluginId, reason: String },
  #[error("插件调用失败: {0}")]
  Dispatch(#[from] DispatchError),
}

impl PluginError {
  /// 是否属于插件解析阶段的错误
  pub fn is_resolution(&self) -> bool {
    !matches!(self, PluginError::Dispatch(_))
  }
}

#[derive(Error, Debug)]
pub enum DispatchError {
  #[error("I/O 错误: {0}")]
  Io(#[from] std::io::Error),
  #[error("序列化错误: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("{0}")]
  Other(String),
}

/// 插件标识，形如 `module.symbol`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PluginId {
  pub module: String,
  pub symbol: String,
}

impl FromStr for PluginId {
  type Err = PluginError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let malformed = || PluginError::MalformedId(s.to_string());
    let (module, symbol) = s.trim().split_once('.').ok_or_else(malformed)?;
    if module.is_empty() || symbol.is_empty() || symbol.contains('.') {
      return Err(malformed());
    }
    Ok(PluginId {
      module: module.to_string(),
      symbol: symbol.to_string(),
    })
  }
}

impl fmt::Display for PluginId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.module, self.symbol)
  }
}

/// 交给插件的原样配置，核心不解读其内容
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PluginConfig(Mapping);

impl PluginConfig {
  pub fn new(mapping: Mapping) -> Self {
    Self(mapping)
  }

  pub fn get(&self, key: &str) -> Option<&Value> {
    self.0.get(key)
  }

  /// 把某一节反序列化为插件自己的配置类型，缺省时使用默认值
  pub fn section<T: DeserializeOwned + Default>(&self, key: &str) -> Result<T, String> {
    match self.get(key) {
      Some(value) => serde_yaml::from_value(value.clone()).map_err(|e| format!("{}: {}", key, e)),
      None => Ok(T::default()),
    }
  }

  pub fn as_mapping(&self) -> &Mapping {
    &self.0
  }
}

/// 通知插件需要提供的能力
pub trait NotifyPlugin {
  /// 通知最高分检测
  fn publish_detection(&mut self, label: &str, score: f32) -> Result<(), DispatchError>;

  /// 通知完整的检测序列
  fn publish_detections(&mut self, detections: &[Detection]) -> Result<(), DispatchError>;

  /// 通知带标注的 PNG 图像
  fn publish_image(&mut self, png: &[u8]) -> Result<(), DispatchError>;

  /// 释放连接等资源
  fn release(&mut self) -> Result<(), DispatchError>;
}

pub type PluginFactory = Box<dyn Fn(&PluginConfig) -> Result<Box<dyn NotifyPlugin>, String>>;

/// 插件注册表，按 `module.symbol` 查找工厂函数
pub struct PluginRegistry {
  factories: BTreeMap<PluginId, PluginFactory>,
}

impl Default for PluginRegistry {
  fn default() -> Self {
    Self::with_builtins()
  }
}

impl PluginRegistry {
  pub fn empty() -> Self {
    Self {
      factories: BTreeMap::new(),
    }
  }

  pub fn with_builtins() -> Self {
    let mut registry = Self::empty();
    registry.register_factory(JsonBusPlugin::ID, |config| {
      Ok(Box::new(JsonBusPlugin::from_config(config)?))
    });
    registry.register_factory(TracingPlugin::ID, |config| {
      Ok(Box::new(TracingPlugin::from_config(config)?))
    });
    registry.register_factory(RecordPlugin::ID, |config| {
      Ok(Box::new(RecordPlugin::from_config(config)?))
    });
    registry
  }

  /// 注册插件，`id` 必须是合法的 `module.symbol`
  pub fn register<F>(&mut self, id: &str, factory: F) -> Result<(), PluginError>
  where
    F: Fn(&PluginConfig) -> Result<Box<dyn NotifyPlugin>, String> + 'static,
  {
    let id = id.parse::<PluginId>()?;
    self.factories.insert(id, Box::new(factory));
    Ok(())
  }

  fn register_factory<F>(&mut self, id: &'static str, factory: F)
  where
    F: Fn(&PluginConfig) -> Result<Box<dyn NotifyPlugin>, String> + 'static,
  {
    if let Err(e) = self.register(id, factory) {
      warn!("内置插件注册失败: {}", e);
    }
  }

  pub fn contains(&self, id: &PluginId) -> bool {
    self.factories.contains_key(id)
  }

  pub fn ids(&self) -> impl Iterator<Item = &PluginId> {
    self.factories.keys()
  }

  /// 解析插件标识并构造插件
  pub fn resolve(&self, id: &str, config: &PluginConfig) -> Result<PluginGuard, PluginError> {
    let id = id.parse::<PluginId>()?;
    let factory = self
      .factories
      .get(&id)
      .ok_or_else(|| PluginError::Unknown(id.clone()))?;
    let plugin = factory(config).map_err(|reason| PluginError::Construct {
      id: id.clone(),
      reason,
    })?;
    info!("插件已加载: {}", id);
    Ok(PluginGuard::new(id, plugin))
  }
}

/// 持有插件并保证释放
///
/// 第一次调用 publish 后进入“已占用”状态；此后无论正常结束还是出错，
/// `release` 都恰好执行一次。未占用时丢弃不会调用插件。
pub struct PluginGuard {
  id: PluginId,
  plugin: Box<dyn NotifyPlugin>,
  engaged: bool,
}

impl PluginGuard {
  pub fn new(id: PluginId, plugin: Box<dyn NotifyPlugin>) -> Self {
    Self {
      id,
      plugin,
      engaged: false,
    }
  }

  pub fn id(&self) -> &PluginId {
    &self.id
  }

  pub fn is_engaged(&self) -> bool {
    self.engaged
  }

  /// 标记为已占用，使释放在退出时一定发生
  pub fn engage(&mut self) {
    self.engaged = true;
  }

  pub fn publish_detection(&mut self, label: &str, score: f32) -> Result<(), DispatchError> {
    self.engaged = true;
    self.plugin.publish_detection(label, score)
  }

  pub fn publish_detections(&mut self, detections: &[Detection]) -> Result<(), DispatchError> {
    self.engaged = true;
    self.plugin.publish_detections(detections)
  }

  pub fn publish_image(&mut self, png: &[u8]) -> Result<(), DispatchError> {
    self.engaged = true;
    self.plugin.publish_image(png)
  }

  /// 释放插件；未占用时不调用插件
  pub fn release(mut self) -> Result<(), DispatchError> {
    self.release_once()
  }

  fn release_once(&mut self) -> Result<(), DispatchError> {
    if !std::mem::replace(&mut self.engaged, false) {
      return Ok(());
    }
    info!("释放插件: {}", self.id);
    self.plugin.release()
  }
}

impl Drop for PluginGuard {
  fn drop(&mut self) {
    if let Err(e) = self.release_once() {
      warn!("插件 {} 释放失败: {}", self.id, e);
    }
  }
}

/// 对一次检测结果执行通知：最高分 -> 全部检测 -> 图像。
///
/// 结果不值得通知时不发生任何插件调用并返回 `false`。图像仅在需要时编码。
pub fn dispatch<F>(
  guard: &mut PluginGuard,
  result: &DetectResult,
  encode_image: F,
) -> Result<bool, DispatchError>
where
  F: FnOnce() -> Result<Vec<u8>, DispatchError>,
{
  if !result.is_actionable() {
    return Ok(false);
  }

  let top = result.top();
  guard.publish_detection(top.label.unwrap_or_default(), top.score)?;
  guard.publish_detections(result.items())?;
  let png = encode_image()?;
  guard.publish_image(&png)?;
  Ok(true)
}

#[cfg(test)]
pub(crate) mod tests {
  use std::{cell::RefCell, rc::Rc};

  use super::*;
  use crate::model::BoundingBox;

  #[derive(Debug, Clone, PartialEq)]
  pub enum Call {
    Detection(String, f32),
    Detections(Vec<String>),
    Image(usize),
    Release,
  }

  #[derive(Default)]
  pub struct Recorder {
    pub calls: Rc<RefCell<Vec<Call>>>,
    pub fail_on_image: bool,
  }

  impl NotifyPlugin for Recorder {
    fn publish_detection(&mut self, label: &str, score: f32) -> Result<(), DispatchError> {
      self.calls.borrow_mut().push(Call::Detection(label.to_string(), score));
      Ok(())
    }

    fn publish_detections(&mut self, detections: &[Detection]) -> Result<(), DispatchError> {
      let labels = detections.iter().map(|d| d.label.clone()).collect();
      self.calls.borrow_mut().push(Call::Detections(labels));
      Ok(())
    }

    fn publish_image(&mut self, png: &[u8]) -> Result<(), DispatchError> {
      if self.fail_on_image {
        return Err(DispatchError::Other("broker down".to_string()));
      }
      self.calls.borrow_mut().push(Call::Image(png.len()));
      Ok(())
    }

    fn release(&mut self) -> Result<(), DispatchError> {
      self.calls.borrow_mut().push(Call::Release);
      Ok(())
    }
  }

  fn guard(fail_on_image: bool) -> (PluginGuard, Rc<RefCell<Vec<Call>>>) {
    let calls = Rc::new(RefCell::new(Vec::new()));
    let plugin = Recorder {
      calls: calls.clone(),
      fail_on_image,
    };
    let id = "test.Recorder".parse().unwrap();
    (PluginGuard::new(id, Box::new(plugin)), calls)
  }

  fn det(label: &str, score: f32) -> Detection {
    Detection {
      label: label.to_string(),
      score,
      bbox: BoundingBox {
        x: 0.0,
        y: 0.0,
        width: 1.0,
        height: 1.0,
      },
    }
  }

  #[test]
  fn test_parse_plugin_id() {
    let id: PluginId = "bus.JsonBus".parse().unwrap();
    assert_eq!(id.module, "bus");
    assert_eq!(id.symbol, "JsonBus");
    assert_eq!(id.to_string(), "bus.JsonBus");

    for bad in ["", "bus", ".JsonBus", "bus.", "a.b.c"] {
      assert!(matches!(bad.parse::<PluginId>(), Err(PluginError::MalformedId(_))), "{bad}");
    }
  }

  #[test]
  fn test_unknown_plugin_fails_resolution() {
    let registry = PluginRegistry::with_builtins();
    let err = registry.resolve("bad.module", &PluginConfig::default()).err().unwrap();
    assert!(matches!(err, PluginError::Unknown(_)));
    assert!(err.is_resolution());
  }

  #[test]
  fn test_builtins_resolve() {
    let registry = PluginRegistry::with_builtins();
    for id in [DEFAULT_PLUGIN, TracingPlugin::ID] {
      let guard = registry.resolve(id, &PluginConfig::default()).unwrap();
      assert_eq!(guard.id().to_string(), id);
    }
    // 记录插件必须配置目录
    let err = registry.resolve(RecordPlugin::ID, &PluginConfig::default()).err().unwrap();
    assert!(matches!(err, PluginError::Construct { .. }));
  }

  #[test]
  fn test_dispatch_order() {
    let (mut guard, calls) = guard(false);
    let result = DetectResult::new(vec![det("person", 0.87), det("person", 0.81)]);

    let dispatched = dispatch(&mut guard, &result, || Ok(vec![0u8; 16])).unwrap();
    assert!(dispatched);
    guard.release().unwrap();

    assert_eq!(
      *calls.borrow(),
      vec![
        Call::Detection("person".to_string(), 0.87),
        Call::Detections(vec!["person".to_string(), "person".to_string()]),
        Call::Image(16),
        Call::Release,
      ]
    );
  }

  #[test]
  fn test_no_dispatch_without_detection() {
    for result in [DetectResult::default(), DetectResult::new(vec![det("person", 0.0)])] {
      let (mut guard, calls) = guard(false);
      let dispatched = dispatch(&mut guard, &result, || panic!("不应编码图像")).unwrap();
      assert!(!dispatched);
      guard.release().unwrap();
      assert!(calls.borrow().is_empty());
    }
  }

  #[test]
  fn test_release_runs_once_on_error_path() {
    let (mut guard, calls) = guard(true);
    let result = DetectResult::new(vec![det("cat", 0.9)]);
    let err = dispatch(&mut guard, &result, || Ok(vec![1, 2, 3])).unwrap_err();
    assert!(matches!(err, DispatchError::Other(_)));
    drop(guard);

    let calls = calls.borrow();
    assert_eq!(calls.iter().filter(|c| **c == Call::Release).count(), 1);
    assert_eq!(calls.last(), Some(&Call::Release));
  }

  #[test]
  fn test_plugin_config_sections() {
    #[derive(serde::Deserialize, Default, Debug, PartialEq)]
    struct Section {
      topic: String,
    }

    let mapping: Mapping = serde_yaml::from_str("bus:\n  topic: home/cam\n").unwrap();
    let config = PluginConfig::new(mapping);
    let section: Section = config.section("bus").unwrap();
    assert_eq!(section.topic, "home/cam");
    let missing: Section = config.section("other").unwrap();
    assert_eq!(missing, Section::default());

    let bad = PluginConfig::new(serde_yaml::from_str("bus: 3\n").unwrap());
    assert!(bad.section::<Section>("bus").is_err());
  }
}
