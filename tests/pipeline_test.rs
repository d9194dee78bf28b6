// 该文件是 yolo-ha 项目的一部分。
// tests/pipeline_test.rs - 端到端检测与通知
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

use std::{cell::RefCell, convert::Infallible, rc::Rc};

use image::{Rgb, RgbImage};

use yolo_ha::{
  config::ConfigFile,
  input::InputWrapper,
  letterbox::LetterboxedTensor,
  model::{Backend, Detection, Detector, DetectorConfig, RawDetection},
  plugin::{DispatchError, NotifyPlugin, PluginConfig, PluginError, PluginRegistry},
  task::{OneShotTask, Pipeline, Task},
};

#[derive(Debug, Clone, PartialEq)]
enum Event {
  Top(String, f32),
  All(Vec<(String, f32)>),
  Png,
  Release,
}

struct Recording(Rc<RefCell<Vec<Event>>>);

impl NotifyPlugin for Recording {
  fn publish_detection(&mut self, label: &str, score: f32) -> Result<(), DispatchError> {
    self.0.borrow_mut().push(Event::Top(label.to_string(), score));
    Ok(())
  }

  fn publish_detections(&mut self, detections: &[Detection]) -> Result<(), DispatchError> {
    let all = detections
      .iter()
      .map(|d| (d.label.clone(), d.score))
      .collect();
    self.0.borrow_mut().push(Event::All(all));
    Ok(())
  }

  fn publish_image(&mut self, png: &[u8]) -> Result<(), DispatchError> {
    assert!(image::load_from_memory(png).is_ok());
    self.0.borrow_mut().push(Event::Png);
    Ok(())
  }

  fn release(&mut self) -> Result<(), DispatchError> {
    self.0.borrow_mut().push(Event::Release);
    Ok(())
  }
}

/// 返回固定候选框的后端，坐标为 416x416 网络空间
struct Canned(Vec<RawDetection>);

impl Backend for Canned {
  type Error = Infallible;

  fn infer(
    &mut self,
    input: &LetterboxedTensor,
    _min_score: f32,
  ) -> Result<Vec<RawDetection>, Self::Error> {
    assert_eq!(input.shape(), [1, 416, 416, 3]);
    Ok(self.0.clone())
  }
}

fn registry_with_recorder() -> (PluginRegistry, Rc<RefCell<Vec<Event>>>) {
  let events = Rc::new(RefCell::new(Vec::new()));
  let mut registry = PluginRegistry::with_builtins();
  let shared = events.clone();
  registry
    .register("test.Recording", move |_config| {
      Ok(Box::new(Recording(shared.clone())))
    })
    .unwrap();
  (registry, events)
}

fn write_image(dir: &std::path::Path, width: u32, height: u32) -> String {
  let path = dir.join("camera.png");
  RgbImage::from_pixel(width, height, Rgb([90, 120, 150]))
    .save(&path)
    .unwrap();
  path.to_str().unwrap().to_string()
}

fn run(raw: Vec<RawDetection>) -> Vec<Event> {
  let dir = tempfile::tempdir().unwrap();
  let source = write_image(dir.path(), 640, 480);
  let (registry, events) = registry_with_recorder();

  let guard = registry
    .resolve("test.Recording", &PluginConfig::default())
    .unwrap();
  let mut pipeline = Pipeline::new(Detector::new(Canned(raw), DetectorConfig::default()));
  let input = InputWrapper::open(&source).unwrap();
  OneShotTask.run_task(input, &mut pipeline, guard).unwrap();

  events.take()
}

#[test]
fn test_two_people_dispatch_in_order() {
  let events = run(vec![
    RawDetection::new("person", 0.81, [40.0, 60.0, 120.0, 300.0]),
    RawDetection::new("person", 0.87, [250.0, 60.0, 330.0, 300.0]),
  ]);

  assert_eq!(
    events,
    vec![
      Event::Top("person".to_string(), 0.87),
      Event::All(vec![
        ("person".to_string(), 0.87),
        ("person".to_string(), 0.81),
      ]),
      Event::Png,
      Event::Release,
    ]
  );
}

#[test]
fn test_nothing_detected_means_no_calls() {
  assert!(run(Vec::new()).is_empty());
  // 低于阈值的候选框同样不会触发通知
  assert!(run(vec![RawDetection::new("cat", 0.2, [0.0, 52.0, 10.0, 60.0])]).is_empty());
}

#[test]
fn test_unknown_plugin_fails_before_reading_image() {
  let (registry, events) = registry_with_recorder();
  let err = registry
    .resolve("bad.module", &PluginConfig::default())
    .err()
    .unwrap();
  assert!(matches!(err, PluginError::Unknown(_)));
  assert!(err.is_resolution());
  assert!(events.borrow().is_empty());
}

#[test]
fn test_config_file_drives_plugin_selection() {
  let dir = tempfile::tempdir().unwrap();
  let source = write_image(dir.path(), 320, 240);
  let yaml = format!(
    "cvconf:\n  plugin: folder.Record\n  video: {}\nfolder:\n  path: {}\n",
    source,
    dir.path().join("records").display()
  );
  let config = ConfigFile::parse(&yaml).unwrap();

  let registry = PluginRegistry::with_builtins();
  let guard = registry
    .resolve(&config.cvconf.plugin, &config.plugin_config())
    .unwrap();
  let mut pipeline = Pipeline::new(Detector::new(
    Canned(vec![RawDetection::new("dog", 0.9, [100.0, 100.0, 300.0, 250.0])]),
    DetectorConfig::default(),
  ));
  let input = InputWrapper::open(&config.cvconf.video).unwrap();
  let outcome = OneShotTask.run_task(input, &mut pipeline, guard).unwrap();

  assert!(outcome.dispatched);
  assert!(dir.path().join("records").is_dir());
}
