// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/engine/onnx.rs - ONNX Runtime 推理引擎
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::{
  borrow::Cow,
  path::Path,
  sync::{Mutex, Once},
};

use ort::{
  execution_providers::{CPUExecutionProvider, CUDAExecutionProvider},
  session::{Session, SessionInputValue, builder::GraphOptimizationLevel},
  value::{Tensor as OrtTensor, ValueType},
};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::{ExecutionOptions, InferenceEngine, TensorInfo};
use crate::tensor::Tensor;

const ORT_ENV_NAME: &str = "shanan-onnx";

static ORT_ENV: Once = Once::new();

#[derive(Error, Debug)]
pub enum OnnxEngineError {
  #[error("模型文件不存在: {0}")]
  NotFound(String),
  #[error("ONNX Runtime 错误: {0}")]
  Ort(#[from] ort::Error),
  #[error("缺少输出张量: {0}")]
  MissingOutput(String),
  #[error("ONNX 会话锁已失效")]
  Poisoned,
  #[error("输出张量 {name} 形状 {shape:?} 与数据长度 {actual} 不一致")]
  OutputTensor {
    name: String,
    shape: Vec<i64>,
    actual: usize,
  },
}

/// 基于 ONNX Runtime 的推理引擎
///
/// ort 的 `Session::run` 需要独占访问，这里用互斥锁保护，
/// 因此同一个引擎可以在多个线程间共享，推理调用会串行执行。
pub struct OnnxEngine {
  session: Mutex<Session>,
  inputs: Vec<TensorInfo>,
  outputs: Vec<TensorInfo>,
}

/// 环境初始化结果，兼容 `bool` 与 `Result<bool, _>` 两种返回
trait EnvironmentCommit {
  fn report(self);
}

impl EnvironmentCommit for bool {
  fn report(self) {
    if self {
      debug!("ONNX Runtime 环境初始化完成");
    } else {
      debug!("ONNX Runtime 环境已存在, 沿用现有环境");
    }
  }
}

impl<E: std::fmt::Display> EnvironmentCommit for Result<bool, E> {
  fn report(self) {
    match self {
      Ok(created) => created.report(),
      Err(e) => warn!("ONNX Runtime 环境初始化失败, 将使用默认环境: {}", e),
    }
  }
}

/// 进程级 ONNX Runtime 环境，只初始化一次
fn init_environment() {
  ORT_ENV.call_once(|| {
    ort::init().with_name(ORT_ENV_NAME).commit().report();
  });
}

/// 把 ort 返回的输出复制为 [`Tensor`]，动态维度或长度不符都视为错误
fn output_tensor(name: &str, shape: &[i64], data: &[f32]) -> Result<Tensor, OnnxEngineError> {
  let mismatch = || OnnxEngineError::OutputTensor {
    name: name.to_string(),
    shape: shape.to_vec(),
    actual: data.len(),
  };
  let dims = shape
    .iter()
    .map(|&d| usize::try_from(d).map_err(|_| mismatch()))
    .collect::<Result<Vec<_>, _>>()?;
  Tensor::new(dims, data.to_vec()).map_err(|_| mismatch())
}

fn tensor_info(name: &str, value_type: &ValueType) -> TensorInfo {
  let shape = value_type
    .tensor_shape()
    .map(|shape| shape.iter().copied().collect())
    .unwrap_or_default();
  TensorInfo {
    name: name.to_string(),
    shape,
  }
}

impl InferenceEngine for OnnxEngine {
  type Error = OnnxEngineError;

  fn load(model_path: &str, options: &ExecutionOptions) -> Result<Self, Self::Error> {
    if !Path::new(model_path).exists() {
      return Err(OnnxEngineError::NotFound(model_path.to_string()));
    }

    init_environment();

    let mut builder = Session::builder()?
      .with_optimization_level(GraphOptimizationLevel::Level3)?
      .with_intra_threads(options.num_threads)?;

    if options.use_accelerator {
      info!("启用 CUDA 执行器, CPU 作为后备");
      builder = builder.with_execution_providers([
        CUDAExecutionProvider::default().build(),
        CPUExecutionProvider::default().build(),
      ])?;
    } else {
      info!("使用 CPU 执行器, 线程数 {}", options.num_threads);
    }

    let session = builder.commit_from_file(model_path)?;

    let inputs = session
      .inputs
      .iter()
      .map(|input| tensor_info(&input.name, &input.input_type))
      .collect::<Vec<_>>();
    let outputs = session
      .outputs
      .iter()
      .map(|output| tensor_info(&output.name, &output.output_type))
      .collect::<Vec<_>>();

    if inputs.iter().chain(outputs.iter()).any(|t| t.shape.is_empty()) {
      warn!("模型存在非张量类型的输入或输出");
    }

    info!("ONNX 模型加载完成: {} 个输入, {} 个输出", inputs.len(), outputs.len());

    Ok(Self {
      session: Mutex::new(session),
      inputs,
      outputs,
    })
  }

  fn inputs(&self) -> &[TensorInfo] {
    &self.inputs
  }

  fn outputs(&self) -> &[TensorInfo] {
    &self.outputs
  }

  fn run(&self, inputs: Vec<(String, Tensor)>) -> Result<Vec<(String, Tensor)>, Self::Error> {
    let mut values: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = Vec::with_capacity(inputs.len());
    for (name, tensor) in inputs {
      let (shape, data) = tensor.into_parts();
      let value = OrtTensor::from_array((shape.as_slice(), data))?;
      values.push((Cow::Owned(name), SessionInputValue::from(value)));
    }

    let mut session = self
      .session
      .lock()
      .map_err(|_| OnnxEngineError::Poisoned)?;
    let outputs = session.run(values)?;

    let mut tensors = Vec::with_capacity(self.outputs.len());
    for info in self.outputs.iter() {
      let value = outputs
        .get(info.name.as_str())
        .ok_or_else(|| OnnxEngineError::MissingOutput(info.name.clone()))?;
      let (shape, data) = value.try_extract_tensor::<f32>()?;
      tensors.push((info.name.clone(), output_tensor(&info.name, shape, data)?));
    }

    Ok(tensors)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_model_file_is_reported() {
    let options = ExecutionOptions {
      num_threads: 1,
      use_accelerator: false,
    };
    assert!(matches!(
      OnnxEngine::load("/nonexistent/yolov8n.onnx", &options),
      Err(OnnxEngineError::NotFound(_))
    ));
  }

  #[test]
  fn environment_commit_reports_both_outcomes() {
    true.report();
    false.report();
    Ok::<bool, String>(true).report();
    Err::<bool, String>("环境创建失败".to_string()).report();
  }

  #[test]
  fn output_tensor_checks_shape_against_data() {
    let tensor = output_tensor("output0", &[1, 2, 3], &[0.0; 6]).unwrap();
    assert_eq!(tensor.shape(), &[1, 2, 3]);

    assert!(matches!(
      output_tensor("output0", &[1, 2, 3], &[0.0; 5]),
      Err(OnnxEngineError::OutputTensor { actual: 5, .. })
    ));
    assert!(matches!(
      output_tensor("output0", &[1, -1, 3], &[0.0; 3]),
      Err(OnnxEngineError::OutputTensor { .. })
    ));
  }
}
