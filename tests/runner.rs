// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// tests/runner.rs - Runner 端到端测试
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

use std::sync::{
  Mutex,
  atomic::{AtomicBool, Ordering},
};

use image::{Rgb, RgbImage};
use shanan_onnx::{
  Configuration, Runner, RunnerError,
  engine::{ExecutionOptions, InferenceEngine, TensorInfo},
  error::{ConfigurationError, InferenceError, PreprocessError},
  letterbox::CpuImageOps,
  model::Model,
  tensor::Tensor,
};

#[derive(Debug, thiserror::Error)]
#[error("scripted engine failure")]
struct ScriptedError;

/// 返回预先写好的输出张量，并记录收到的输入
struct ScriptedEngine {
  inputs: Vec<TensorInfo>,
  outputs: Vec<TensorInfo>,
  reply: Option<Tensor>,
  fail_next: AtomicBool,
  received: Mutex<Vec<Vec<usize>>>,
}

impl InferenceEngine for ScriptedEngine {
  type Error = ScriptedError;

  fn load(_: &str, _: &ExecutionOptions) -> Result<Self, Self::Error> {
    Err(ScriptedError)
  }

  fn inputs(&self) -> &[TensorInfo] {
    &self.inputs
  }

  fn outputs(&self) -> &[TensorInfo] {
    &self.outputs
  }

  fn run(&self, inputs: Vec<(String, Tensor)>) -> Result<Vec<(String, Tensor)>, Self::Error> {
    let mut received = self.received.lock().unwrap();
    for (_, tensor) in inputs.iter() {
      received.push(tensor.shape().to_vec());
    }
    if self.fail_next.swap(false, Ordering::SeqCst) {
      return Err(ScriptedError);
    }
    let reply = self.reply.clone().ok_or(ScriptedError)?;
    Ok(vec![(self.outputs[0].name.clone(), reply)])
  }
}

const NUM_CLASSES: usize = 2;
const NUM_CANDIDATES: usize = 8;

/// 候选框：(cx, cy, w, h, [每类分数])，模型空间
type Candidate = (f32, f32, f32, f32, [f32; NUM_CLASSES]);

/// 构造 `[1, 4 + C, N]` 输出，未填写的候选框分数为 0
fn yolo_output(candidates: &[Candidate]) -> Tensor {
  let attrs = 4 + NUM_CLASSES;
  let mut data = vec![0.0; attrs * NUM_CANDIDATES];
  for (i, &(cx, cy, w, h, scores)) in candidates.iter().enumerate() {
    let values = [cx, cy, w, h, scores[0], scores[1]];
    for (attr, value) in values.into_iter().enumerate() {
      data[attr * NUM_CANDIDATES + i] = value;
    }
  }
  Tensor::new(vec![1, attrs, NUM_CANDIDATES], data).unwrap()
}

fn engine(input_hw: (i64, i64), reply: Option<Tensor>) -> ScriptedEngine {
  ScriptedEngine {
    inputs: vec![TensorInfo {
      name: "images".to_string(),
      shape: vec![1, 3, input_hw.0, input_hw.1],
    }],
    outputs: vec![TensorInfo {
      name: "output0".to_string(),
      shape: vec![1, (4 + NUM_CLASSES) as i64, NUM_CANDIDATES as i64],
    }],
    reply,
    fail_next: AtomicBool::new(false),
    received: Mutex::new(Vec::new()),
  }
}

fn runner(candidates: &[Candidate]) -> Runner<ScriptedEngine> {
  let config = Configuration::new("scripted.onnx");
  Runner::from_engine(config, engine((640, 640), Some(yolo_output(candidates))), CpuImageOps)
    .unwrap()
}

fn image(width: u32, height: u32) -> RgbImage {
  RgbImage::from_pixel(width, height, Rgb([120, 60, 30]))
}

#[test]
fn detection_is_mapped_back_to_source_image() {
  let runner = runner(&[(320.0, 240.0, 100.0, 50.0, [0.9, 0.1])]);
  let detections = runner.infer(&image(640, 480)).unwrap();

  assert_eq!(detections.len(), 1);
  let det = &detections[0];
  assert_eq!(det.class_id, 0);
  assert!((det.confidence - 0.9).abs() < 1e-6);
  assert!((det.bbox.x - 270.0).abs() < 1e-3);
  assert!((det.bbox.y - 135.0).abs() < 1e-3);
  assert!((det.bbox.width - 100.0).abs() < 1e-3);
  assert!((det.bbox.height - 50.0).abs() < 1e-3);

  let received = runner.session().engine().received.lock().unwrap();
  assert_eq!(*received, vec![vec![1, 3, 640, 640]]);
}

#[test]
fn low_confidence_yields_empty_result() {
  let runner = runner(&[(320.0, 320.0, 100.0, 50.0, [0.2, 0.3])]);
  assert!(runner.infer(&image(640, 480)).unwrap().is_empty());
}

#[test]
fn overlapping_boxes_of_same_class_are_suppressed() {
  let runner = runner(&[
    (320.0, 320.0, 100.0, 100.0, [0.9, 0.0]),
    (322.0, 320.0, 100.0, 100.0, [0.6, 0.0]),
    (322.0, 320.0, 100.0, 100.0, [0.0, 0.7]),
  ]);
  let detections = runner.infer(&image(640, 640)).unwrap();

  assert_eq!(detections.len(), 2);
  assert_eq!(detections[0].class_id, 0);
  assert!((detections[0].confidence - 0.9).abs() < 1e-6);
  assert_eq!(detections[1].class_id, 1);
  assert!((detections[1].confidence - 0.7).abs() < 1e-6);
}

#[test]
fn empty_image_fails_before_engine() {
  let runner = runner(&[]);
  let result = runner.infer(&RgbImage::new(0, 10));
  assert!(matches!(
    result,
    Err(RunnerError::Preprocess(PreprocessError::EmptyImage { .. }))
  ));
  assert!(runner.session().engine().received.lock().unwrap().is_empty());
}

#[test]
fn engine_failure_is_inference_error() {
  let config = Configuration::new("scripted.onnx");
  let runner = Runner::from_engine(config, engine((640, 640), None), CpuImageOps).unwrap();
  assert!(matches!(
    runner.infer(&image(32, 32)),
    Err(RunnerError::Inference(InferenceError::Engine(_)))
  ));
}

#[test]
fn runner_recovers_after_engine_failure() {
  let runner = runner(&[(320.0, 240.0, 100.0, 50.0, [0.9, 0.1])]);
  runner
    .session()
    .engine()
    .fail_next
    .store(true, Ordering::SeqCst);

  assert!(matches!(
    runner.infer(&image(640, 480)),
    Err(RunnerError::Inference(InferenceError::Engine(_)))
  ));

  let detections = runner.infer(&image(640, 480)).unwrap();
  assert_eq!(detections.len(), 1);
  assert_eq!(detections[0].class_id, 0);
  assert!((detections[0].bbox.x - 270.0).abs() < 1e-3);
  assert!((detections[0].bbox.y - 135.0).abs() < 1e-3);
  assert_eq!(runner.session().engine().received.lock().unwrap().len(), 2);
}

#[test]
fn downscaled_source_is_mapped_back() {
  // 1280x720 -> 640x360, scale 0.5, 上下各填充 140
  let runner = runner(&[(320.0, 320.0, 100.0, 50.0, [0.0, 0.8])]);
  let detections = runner.infer(&image(1280, 720)).unwrap();

  assert_eq!(detections.len(), 1);
  let det = &detections[0];
  assert_eq!(det.class_id, 1);
  assert!((det.bbox.x - 540.0).abs() < 1e-3);
  assert!((det.bbox.y - 310.0).abs() < 1e-3);
  assert!((det.bbox.width - 200.0).abs() < 1e-3);
  assert!((det.bbox.height - 100.0).abs() < 1e-3);
}

#[test]
fn model_input_size_must_match_configuration() {
  let config = Configuration::new("scripted.onnx").input_size(320, 320);
  let result = Runner::from_engine(config, engine((640, 640), None), CpuImageOps);
  assert!(matches!(
    result,
    Err(RunnerError::Configuration(
      ConfigurationError::InputSizeMismatch { .. }
    ))
  ));
}

#[test]
fn invalid_configuration_is_rejected() {
  let config = Configuration::new("scripted.onnx").conf_threshold(1.5);
  assert!(matches!(
    Runner::from_engine(config, engine((640, 640), None), CpuImageOps),
    Err(RunnerError::Configuration(
      ConfigurationError::ThresholdOutOfRange { .. }
    ))
  ));
}

#[test]
fn load_failure_is_model_load_error() {
  assert!(matches!(
    Runner::<ScriptedEngine>::new(Configuration::new("scripted.onnx")),
    Err(RunnerError::ModelLoad(_))
  ));
}

#[test]
fn thresholds_can_be_adjusted() {
  let mut runner = runner(&[(320.0, 320.0, 100.0, 50.0, [0.4, 0.0])]);
  assert!(runner.infer(&image(640, 480)).unwrap().is_empty());

  runner.set_conf_threshold(0.3).unwrap();
  assert_eq!(runner.infer(&image(640, 480)).unwrap().len(), 1);

  assert!(runner.set_conf_threshold(-0.1).is_err());
  assert!(runner.set_nms_threshold(2.0).is_err());
  assert_eq!(runner.config().conf_threshold, 0.3);
}

#[test]
fn runner_is_a_model() {
  let runner = runner(&[(320.0, 320.0, 100.0, 50.0, [0.0, 0.8])]);
  let detections = Model::infer(&runner, &image(640, 480)).unwrap();
  assert_eq!(detections.len(), 1);
  assert_eq!(detections[0].class_id, 1);
}
