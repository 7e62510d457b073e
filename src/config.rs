// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/config.rs - 运行参数配置
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

use std::str::FromStr;

use tracing::warn;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme, engine::ExecutionOptions, error::ConfigurationError};

const DEFAULT_CONF_THRESHOLD: f32 = 0.5;
const DEFAULT_NMS_THRESHOLD: f32 = 0.45;
const DEFAULT_NUM_THREADS: usize = 4;
const DEFAULT_INPUT_W: u32 = 640;
const DEFAULT_INPUT_H: u32 = 640;

/// 推理运行参数，构造后不可变
#[derive(Debug, Clone, PartialEq)]
pub struct Configuration {
  pub model_path: String,
  pub conf_threshold: f32,
  pub nms_threshold: f32,
  pub num_threads: usize,
  pub use_accelerator: bool,
  pub input_width: u32,
  pub input_height: u32,
}

impl Default for Configuration {
  fn default() -> Self {
    Self {
      model_path: String::new(),
      conf_threshold: DEFAULT_CONF_THRESHOLD,
      nms_threshold: DEFAULT_NMS_THRESHOLD,
      num_threads: DEFAULT_NUM_THREADS,
      use_accelerator: false,
      input_width: DEFAULT_INPUT_W,
      input_height: DEFAULT_INPUT_H,
    }
  }
}

impl Configuration {
  pub fn new(model_path: impl Into<String>) -> Self {
    Self {
      model_path: model_path.into(),
      ..Self::default()
    }
  }

  pub fn conf_threshold(mut self, threshold: f32) -> Self {
    self.conf_threshold = threshold;
    self
  }

  pub fn nms_threshold(mut self, threshold: f32) -> Self {
    self.nms_threshold = threshold;
    self
  }

  pub fn num_threads(mut self, num_threads: usize) -> Self {
    self.num_threads = num_threads;
    self
  }

  pub fn use_accelerator(mut self, enable: bool) -> Self {
    self.use_accelerator = enable;
    self
  }

  pub fn input_size(mut self, width: u32, height: u32) -> Self {
    self.input_width = width;
    self.input_height = height;
    self
  }

  /// 检查阈值范围和尺寸
  pub fn validate(&self) -> Result<(), ConfigurationError> {
    if self.model_path.is_empty() {
      return Err(ConfigurationError::EmptyModelPath);
    }
    check_probability("conf_threshold", self.conf_threshold)?;
    check_probability("nms_threshold", self.nms_threshold)?;
    if self.num_threads == 0 {
      return Err(ConfigurationError::NonPositive { name: "num_threads" });
    }
    if self.input_width == 0 {
      return Err(ConfigurationError::NonPositive { name: "input_width" });
    }
    if self.input_height == 0 {
      return Err(ConfigurationError::NonPositive {
        name: "input_height",
      });
    }
    Ok(())
  }

  pub fn execution_options(&self) -> ExecutionOptions {
    ExecutionOptions {
      num_threads: self.num_threads,
      use_accelerator: self.use_accelerator,
    }
  }
}

pub(crate) fn check_probability(name: &'static str, value: f32) -> Result<(), ConfigurationError> {
  // NaN 也会落在这里
  if !(0.0..=1.0).contains(&value) {
    return Err(ConfigurationError::ThresholdOutOfRange { name, value });
  }
  Ok(())
}

fn parse_value<T: FromStr>(key: &str, value: &str) -> Result<T, ConfigurationError> {
  value
    .parse()
    .map_err(|_| ConfigurationError::InvalidParameter {
      key: key.to_string(),
      value: value.to_string(),
    })
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ConfigurationError> {
  match value {
    "" | "1" | "true" | "on" | "yes" => Ok(true),
    "0" | "false" | "off" | "no" => Ok(false),
    _ => Err(ConfigurationError::InvalidParameter {
      key: key.to_string(),
      value: value.to_string(),
    }),
  }
}

impl FromUrlWithScheme for Configuration {
  const SCHEME: &'static str = "onnx";
}

/// 从 URL 构造配置，例如
/// `onnx:///models/yolov8n.onnx?conf=0.4&nms=0.5&threads=2&accel=true&width=640&height=640`
impl FromUrl for Configuration {
  type Error = ConfigurationError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ConfigurationError::SchemeMismatch {
        expected: Self::SCHEME,
        actual: url.scheme().to_string(),
      });
    }

    let mut config = Configuration::new(url.path());
    for (key, value) in url.query_pairs() {
      match &*key {
        "conf" => config.conf_threshold = parse_value(&key, &value)?,
        "nms" => config.nms_threshold = parse_value(&key, &value)?,
        "threads" => config.num_threads = parse_value(&key, &value)?,
        "accel" => config.use_accelerator = parse_flag(&key, &value)?,
        "width" => config.input_width = parse_value(&key, &value)?,
        "height" => config.input_height = parse_value(&key, &value)?,
        _ => warn!("忽略未知的模型参数: {}={}", key, value),
      }
    }

    config.validate()?;
    Ok(config)
  }
}
