// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/letterbox/ops.rs - 图像缩放与填充
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

use image::{
  Rgb, RgbImage,
  imageops::{self, FilterType},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpolation {
  Nearest,
  Linear,
  /// 区域平均，缩小图像时质量最好
  Area,
}

/// 纯函数式的图像变换
pub trait ImageOps {
  fn resize(
    &self,
    image: &RgbImage,
    width: u32,
    height: u32,
    interpolation: Interpolation,
  ) -> RgbImage;

  fn pad(
    &self,
    image: &RgbImage,
    top: u32,
    bottom: u32,
    left: u32,
    right: u32,
    fill: Rgb<u8>,
  ) -> RgbImage;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct CpuImageOps;

impl ImageOps for CpuImageOps {
  fn resize(
    &self,
    image: &RgbImage,
    width: u32,
    height: u32,
    interpolation: Interpolation,
  ) -> RgbImage {
    if image.dimensions() == (width, height) {
      return image.clone();
    }

    match interpolation {
      Interpolation::Nearest => imageops::resize(image, width, height, FilterType::Nearest),
      Interpolation::Linear => imageops::resize(image, width, height, FilterType::Triangle),
      Interpolation::Area => {
        // thumbnail 按源像素覆盖面积取平均，只适合缩小
        if width <= image.width() && height <= image.height() {
          imageops::thumbnail(image, width, height)
        } else {
          imageops::resize(image, width, height, FilterType::Triangle)
        }
      }
    }
  }

  fn pad(
    &self,
    image: &RgbImage,
    top: u32,
    bottom: u32,
    left: u32,
    right: u32,
    fill: Rgb<u8>,
  ) -> RgbImage {
    if top == 0 && bottom == 0 && left == 0 && right == 0 {
      return image.clone();
    }

    let (width, height) = image.dimensions();
    let mut canvas = RgbImage::from_pixel(width + left + right, height + top + bottom, fill);
    imageops::replace(&mut canvas, image, left as i64, top as i64);
    canvas
  }
}
