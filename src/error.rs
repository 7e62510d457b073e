// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/error.rs - 错误类型定义
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

use thiserror::Error;

/// 推理引擎返回的底层错误
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// 配置错误，构造阶段致命，不可重试
#[derive(Error, Debug)]
pub enum ConfigurationError {
  #[error("{name} 必须位于 [0, 1] 区间, 实际为 {value}")]
  ThresholdOutOfRange { name: &'static str, value: f32 },
  #[error("{name} 必须为正数")]
  NonPositive { name: &'static str },
  #[error("模型路径为空")]
  EmptyModelPath,
  #[error("模型输入尺寸不匹配: 配置为 {expected_width}x{expected_height}, 模型声明为 {actual:?}")]
  InputSizeMismatch {
    expected_width: u32,
    expected_height: u32,
    actual: Vec<i64>,
  },
  #[error("URI 方案不匹配: 期望 '{expected}', 实际 '{actual}'")]
  SchemeMismatch {
    expected: &'static str,
    actual: String,
  },
  #[error("无法解析参数 {key}={value}")]
  InvalidParameter { key: String, value: String },
}

/// 模型加载错误，构造阶段致命
#[derive(Error, Debug)]
pub enum ModelLoadError {
  #[error("推理引擎加载模型失败: {0}")]
  Engine(#[source] BoxError),
  #[error("不支持的模型结构: {0}")]
  UnsupportedGraph(String),
}

/// 单次推理错误，不影响 Runner 状态
#[derive(Error, Debug)]
pub enum InferenceError {
  #[error("推理引擎执行失败: {0}")]
  Engine(#[source] BoxError),
  #[error("输入张量形状不匹配: 期望 {expected:?}, 实际 {actual:?}")]
  InputShapeMismatch { expected: Vec<i64>, actual: Vec<usize> },
  #[error("输出张量数量不匹配: 期望 {expected}, 实际 {actual}")]
  OutputCount { expected: usize, actual: usize },
  #[error("缺少输出张量: {0}")]
  MissingOutput(String),
  #[error("无法解析输出张量布局 {shape:?}: {reason}")]
  OutputLayout {
    shape: Vec<usize>,
    reason: &'static str,
  },
  #[error("张量数据长度不匹配: 形状 {shape:?} 需要 {expected} 个元素, 实际 {actual}")]
  TensorSize {
    shape: Vec<usize>,
    expected: usize,
    actual: usize,
  },
}

/// 预处理错误，在调用推理引擎之前抛出
#[derive(Error, Debug)]
pub enum PreprocessError {
  #[error("输入图像尺寸无效: {width}x{height}")]
  EmptyImage { width: u32, height: u32 },
  #[error("目标尺寸无效: {width}x{height}")]
  EmptyTarget { width: u32, height: u32 },
}

#[derive(Error, Debug)]
pub enum RunnerError {
  #[error("配置错误: {0}")]
  Configuration(#[from] ConfigurationError),
  #[error("模型加载错误: {0}")]
  ModelLoad(#[from] ModelLoadError),
  #[error("推理错误: {0}")]
  Inference(#[from] InferenceError),
  #[error("预处理错误: {0}")]
  Preprocess(#[from] PreprocessError),
}
