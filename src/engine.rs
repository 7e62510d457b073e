// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/engine.rs - 推理引擎接口与会话
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use tracing::{debug, error, info};

use crate::{
  config::Configuration,
  error::{ConfigurationError, InferenceError, ModelLoadError, RunnerError},
  tensor::Tensor,
};

#[cfg(feature = "onnx")]
mod onnx;
#[cfg(feature = "onnx")]
pub use self::onnx::{OnnxEngine, OnnxEngineError};

/// 模型声明的张量名称与形状，动态维度为负数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TensorInfo {
  pub name: String,
  pub shape: Vec<i64>,
}

/// 执行选项，构造会话时一次性确定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionOptions {
  pub num_threads: usize,
  pub use_accelerator: bool,
}

/// 推理引擎
///
/// `run` 通过 `&self` 调用；实现需要自行保证多线程并发调用时的正确性，
/// Runner 本身不加锁。
pub trait InferenceEngine: Sized {
  type Error: std::error::Error + Send + Sync + 'static;

  fn load(model_path: &str, options: &ExecutionOptions) -> Result<Self, Self::Error>;
  fn inputs(&self) -> &[TensorInfo];
  fn outputs(&self) -> &[TensorInfo];
  fn run(&self, inputs: Vec<(String, Tensor)>) -> Result<Vec<(String, Tensor)>, Self::Error>;
}

/// 已加载的模型及其输入输出信息
pub struct EngineSession<E> {
  engine: E,
  input: TensorInfo,
  outputs: Vec<TensorInfo>,
}

impl<E: InferenceEngine> EngineSession<E> {
  pub fn load(config: &Configuration) -> Result<Self, RunnerError> {
    info!("加载模型文件: {}", config.model_path);
    let options = config.execution_options();
    let engine = E::load(&config.model_path, &options).map_err(|e| {
      error!("模型加载失败: {}", e);
      ModelLoadError::Engine(Box::new(e))
    })?;
    Self::from_engine(engine, config)
  }

  /// 使用已加载的引擎构造会话，并校验输入尺寸
  pub fn from_engine(engine: E, config: &Configuration) -> Result<Self, RunnerError> {
    let input = match engine.inputs() {
      [input] => input.clone(),
      inputs => {
        return Err(
          ModelLoadError::UnsupportedGraph(format!("预期 1 个模型输入, 实际为 {}", inputs.len()))
            .into(),
        );
      }
    };
    let outputs = engine.outputs().to_vec();
    if outputs.is_empty() {
      return Err(ModelLoadError::UnsupportedGraph("模型没有输出".to_string()).into());
    }

    debug!("模型输入: {} {:?}", input.name, input.shape);
    for output in outputs.iter() {
      debug!("模型输出: {} {:?}", output.name, output.shape);
    }

    check_input_shape(&input, config)?;

    Ok(Self {
      engine,
      input,
      outputs,
    })
  }

  pub fn input(&self) -> &TensorInfo {
    &self.input
  }

  pub fn outputs(&self) -> &[TensorInfo] {
    &self.outputs
  }

  pub fn engine(&self) -> &E {
    &self.engine
  }

  /// 执行一次推理，按模型声明的顺序返回输出张量
  pub fn run(&self, input: Tensor) -> Result<Vec<Tensor>, InferenceError> {
    if !shape_matches(&self.input.shape, input.shape()) {
      return Err(InferenceError::InputShapeMismatch {
        expected: self.input.shape.clone(),
        actual: input.shape().to_vec(),
      });
    }

    let mut returned = self
      .engine
      .run(vec![(self.input.name.clone(), input)])
      .map_err(|e| InferenceError::Engine(Box::new(e)))?;

    if returned.len() != self.outputs.len() {
      return Err(InferenceError::OutputCount {
        expected: self.outputs.len(),
        actual: returned.len(),
      });
    }

    let mut tensors = Vec::with_capacity(self.outputs.len());
    for info in self.outputs.iter() {
      let idx = returned
        .iter()
        .position(|(name, _)| name == &info.name)
        .ok_or_else(|| InferenceError::MissingOutput(info.name.clone()))?;
      let (_, tensor) = returned.swap_remove(idx);
      tensors.push(tensor);
    }
    Ok(tensors)
  }
}

/// 声明形状中的负数维度视为动态维度
fn shape_matches(declared: &[i64], actual: &[usize]) -> bool {
  declared.len() == actual.len()
    && declared
      .iter()
      .zip(actual)
      .all(|(&d, &a)| d < 0 || d as usize == a)
}

/// 输入必须为 `[1, 3, H, W]`，各维度可以是动态维度，H/W 固定时须与配置一致
fn check_input_shape(input: &TensorInfo, config: &Configuration) -> Result<(), RunnerError> {
  let &[batch, channels, height, width] = input.shape.as_slice() else {
    return Err(
      ModelLoadError::UnsupportedGraph(format!(
        "模型输入 {} 必须为 NCHW 四维张量, 实际为 {:?}",
        input.name, input.shape
      ))
      .into(),
    );
  };

  if batch >= 0 && batch != 1 {
    return Err(
      ModelLoadError::UnsupportedGraph(format!("模型输入 batch 必须为 1, 实际为 {}", batch)).into(),
    );
  }

  if channels >= 0 && channels != 3 {
    return Err(
      ModelLoadError::UnsupportedGraph(format!("模型输入通道数必须为 3, 实际为 {}", channels))
        .into(),
    );
  }

  let height_ok = height < 0 || height == config.input_height as i64;
  let width_ok = width < 0 || width == config.input_width as i64;
  if !(height_ok && width_ok) {
    error!(
      "模型输入尺寸 {:?} 与配置 {}x{} 不一致",
      input.shape, config.input_width, config.input_height
    );
    return Err(
      ConfigurationError::InputSizeMismatch {
        expected_width: config.input_width,
        expected_height: config.input_height,
        actual: input.shape.clone(),
      }
      .into(),
    );
  }

  Ok(())
}
