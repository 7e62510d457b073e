// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/letterbox.rs - 保持宽高比的缩放填充预处理
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

use image::{Rgb, RgbImage};
use tracing::debug;

use crate::{error::PreprocessError, model::BoundingBox, tensor::Tensor};

mod ops;
pub use self::ops::{CpuImageOps, ImageOps, Interpolation};

const PAD_COLOR: Rgb<u8> = Rgb([0, 0, 0]);

/// Letterbox 变换记录，后处理用它把模型空间坐标还原到原图空间
///
/// 每个轴满足 `scaled + pad_前 + pad_后 == target`，奇数余量放在右侧/下侧。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Letterbox {
  pub scale: f32,
  pub pad_left: u32,
  pub pad_top: u32,
  pub pad_right: u32,
  pub pad_bottom: u32,
  pub source_width: u32,
  pub source_height: u32,
  pub target_width: u32,
  pub target_height: u32,
}

impl Letterbox {
  pub fn compute(
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
  ) -> Result<Self, PreprocessError> {
    if source_width == 0 || source_height == 0 {
      return Err(PreprocessError::EmptyImage {
        width: source_width,
        height: source_height,
      });
    }
    if target_width == 0 || target_height == 0 {
      return Err(PreprocessError::EmptyTarget {
        width: target_width,
        height: target_height,
      });
    }

    let scale_w = target_width as f32 / source_width as f32;
    let scale_h = target_height as f32 / source_height as f32;
    let scale = scale_w.min(scale_h);

    let scaled_width = ((source_width as f32 * scale).round() as u32).clamp(1, target_width);
    let scaled_height = ((source_height as f32 * scale).round() as u32).clamp(1, target_height);

    let pad_left = (target_width - scaled_width) / 2;
    let pad_top = (target_height - scaled_height) / 2;

    Ok(Self {
      scale,
      pad_left,
      pad_top,
      pad_right: target_width - scaled_width - pad_left,
      pad_bottom: target_height - scaled_height - pad_top,
      source_width,
      source_height,
      target_width,
      target_height,
    })
  }

  /// 缩放后（填充前）的图像尺寸
  pub fn scaled_size(&self) -> (u32, u32) {
    (
      self.target_width - self.pad_left - self.pad_right,
      self.target_height - self.pad_top - self.pad_bottom,
    )
  }

  pub fn to_model_point(&self, x: f32, y: f32) -> (f32, f32) {
    (
      x * self.scale + self.pad_left as f32,
      y * self.scale + self.pad_top as f32,
    )
  }

  pub fn to_source_point(&self, x: f32, y: f32) -> (f32, f32) {
    (
      (x - self.pad_left as f32) / self.scale,
      (y - self.pad_top as f32) / self.scale,
    )
  }

  /// 把模型空间的中心点框转换为原图空间的左上角框，并裁剪到原图范围内
  ///
  /// 裁剪后宽或高为零的退化框返回 `None`。
  pub fn to_source_box(&self, cx: f32, cy: f32, w: f32, h: f32) -> Option<BoundingBox> {
    let (x1, y1) = self.to_source_point(cx - w / 2.0, cy - h / 2.0);
    let (x2, y2) = self.to_source_point(cx + w / 2.0, cy + h / 2.0);

    let max_x = self.source_width as f32;
    let max_y = self.source_height as f32;
    let x1 = x1.clamp(0.0, max_x);
    let y1 = y1.clamp(0.0, max_y);
    let x2 = x2.clamp(0.0, max_x);
    let y2 = y2.clamp(0.0, max_y);

    // NaN 比较结果为 false，同样被丢弃
    if !(x2 - x1 > 0.0 && y2 - y1 > 0.0) {
      return None;
    }

    Some(BoundingBox {
      x: x1,
      y: y1,
      width: x2 - x1,
      height: y2 - y1,
    })
  }
}

/// 缩放并填充图像到目标尺寸
pub fn letterbox<O: ImageOps>(
  ops: &O,
  image: &RgbImage,
  target_width: u32,
  target_height: u32,
) -> Result<(RgbImage, Letterbox), PreprocessError> {
  let (width, height) = image.dimensions();
  let lb = Letterbox::compute(width, height, target_width, target_height)?;
  let (scaled_width, scaled_height) = lb.scaled_size();

  debug!(
    "Letterbox: {}x{} -> {}x{}, 缩放 {:.4}, 填充 左{} 上{} 右{} 下{}",
    width,
    height,
    scaled_width,
    scaled_height,
    lb.scale,
    lb.pad_left,
    lb.pad_top,
    lb.pad_right,
    lb.pad_bottom
  );

  let resized = ops.resize(image, scaled_width, scaled_height, Interpolation::Area);
  let padded = ops.pad(
    &resized,
    lb.pad_top,
    lb.pad_bottom,
    lb.pad_left,
    lb.pad_right,
    PAD_COLOR,
  );

  Ok((padded, lb))
}

/// 预处理：letterbox 后转为 NCHW 张量
pub fn preprocess<O: ImageOps>(
  ops: &O,
  image: &RgbImage,
  target_width: u32,
  target_height: u32,
) -> Result<(Tensor, Letterbox), PreprocessError> {
  let (padded, lb) = letterbox(ops, image, target_width, target_height)?;
  Ok((Tensor::from_rgb_nchw(&padded), lb))
}
