// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/tensor.rs - 模型输入输出张量
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

use image::RgbImage;

use crate::error::InferenceError;

const RGB_CHANNELS: usize = 3;

/// 行优先存储的 f32 张量
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
  shape: Vec<usize>,
  data: Vec<f32>,
}

impl Tensor {
  pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, InferenceError> {
    let expected = shape.iter().product::<usize>();
    if expected != data.len() {
      return Err(InferenceError::TensorSize {
        shape,
        expected,
        actual: data.len(),
      });
    }
    Ok(Self { shape, data })
  }

  pub fn zeros(shape: Vec<usize>) -> Self {
    let size = shape.iter().product::<usize>();
    Self {
      shape,
      data: vec![0.0; size],
    }
  }

  pub fn shape(&self) -> &[usize] {
    &self.shape
  }

  pub fn data(&self) -> &[f32] {
    &self.data
  }

  pub fn into_parts(self) -> (Vec<usize>, Vec<f32>) {
    (self.shape, self.data)
  }

  /// 将 RGB 图像转为 `[1, 3, H, W]` 的 NCHW 张量，像素值归一化到 [0, 1]
  pub fn from_rgb_nchw(image: &RgbImage) -> Self {
    let (width, height) = image.dimensions();
    let (width, height) = (width as usize, height as usize);
    let plane_size = width * height;
    let mut data = vec![0.0f32; RGB_CHANNELS * plane_size];

    for (x, y, pixel) in image.enumerate_pixels() {
      let idx = y as usize * width + x as usize;
      for c in 0..RGB_CHANNELS {
        data[c * plane_size + idx] = pixel[c] as f32 / 255.0;
      }
    }

    Self {
      shape: vec![1, RGB_CHANNELS, height, width],
      data,
    }
  }
}
