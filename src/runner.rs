// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/runner.rs - 目标检测推理流程
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::time::Instant;

use image::RgbImage;
use tracing::{debug, info};

use crate::{
  config::{Configuration, check_probability},
  engine::{EngineSession, InferenceEngine},
  error::{ConfigurationError, InferenceError, RunnerError},
  letterbox::{CpuImageOps, ImageOps, preprocess},
  model::{Detection, Model},
  postprocess::postprocess,
};

/// 预处理 → 推理 → 后处理
///
/// 每次 `infer` 都独立分配张量与候选框，Runner 除了只读的会话之外不保存任何调用状态。
/// 是否可以跨线程并发调用取决于引擎 `run` 的线程安全性。
pub struct Runner<E, O = CpuImageOps> {
  config: Configuration,
  session: EngineSession<E>,
  ops: O,
}

impl<E: InferenceEngine> Runner<E, CpuImageOps> {
  pub fn new(config: Configuration) -> Result<Self, RunnerError> {
    Self::with_image_ops(config, CpuImageOps)
  }
}

impl<E: InferenceEngine, O: ImageOps> Runner<E, O> {
  pub fn with_image_ops(config: Configuration, ops: O) -> Result<Self, RunnerError> {
    config.validate()?;
    let session = EngineSession::load(&config)?;
    Ok(Self {
      config,
      session,
      ops,
    })
  }

  /// 使用已加载的引擎构造
  pub fn from_engine(config: Configuration, engine: E, ops: O) -> Result<Self, RunnerError> {
    config.validate()?;
    let session = EngineSession::from_engine(engine, &config)?;
    Ok(Self {
      config,
      session,
      ops,
    })
  }

  pub fn config(&self) -> &Configuration {
    &self.config
  }

  pub fn session(&self) -> &EngineSession<E> {
    &self.session
  }

  pub fn set_conf_threshold(&mut self, threshold: f32) -> Result<(), ConfigurationError> {
    check_probability("conf_threshold", threshold)?;
    self.config.conf_threshold = threshold;
    Ok(())
  }

  pub fn set_nms_threshold(&mut self, threshold: f32) -> Result<(), ConfigurationError> {
    check_probability("nms_threshold", threshold)?;
    self.config.nms_threshold = threshold;
    Ok(())
  }

  pub fn infer(&self, image: &RgbImage) -> Result<Vec<Detection>, RunnerError> {
    let now = Instant::now();
    let (tensor, letterbox) = preprocess(
      &self.ops,
      image,
      self.config.input_width,
      self.config.input_height,
    )?;
    let preprocess_elapsed = now.elapsed();

    let now = Instant::now();
    let outputs = self.session.run(tensor)?;
    let inference_elapsed = now.elapsed();

    let now = Instant::now();
    let output = outputs.first().ok_or(InferenceError::OutputCount {
      expected: 1,
      actual: 0,
    })?;
    let detections = postprocess(
      output,
      &letterbox,
      self.config.conf_threshold,
      self.config.nms_threshold,
    )?;
    let postprocess_elapsed = now.elapsed();

    debug!(
      "预处理 {:.2?}, 推理 {:.2?}, 后处理 {:.2?}",
      preprocess_elapsed, inference_elapsed, postprocess_elapsed
    );
    info!(
      "检测到 {} 个物体 ({}x{})",
      detections.len(),
      image.width(),
      image.height()
    );

    Ok(detections)
  }
}

impl<E: InferenceEngine, O: ImageOps> Model for Runner<E, O> {
  type Input = RgbImage;
  type Output = Vec<Detection>;
  type Error = RunnerError;

  fn infer(&self, input: &Self::Input) -> Result<Self::Output, Self::Error> {
    Runner::infer(self, input)
  }
}
