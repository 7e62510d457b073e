// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/output/draw.rs - 目标检测结果可视化
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use image::{Rgb, RgbImage};
use imageproc::{drawing::draw_hollow_rect_mut, rect::Rect};

use crate::model::{Detection, WithLabel};

const BOX_THICKNESS: u32 = 2;

// 按类别编号循环取色
const PALETTE: [[u8; 3]; 8] = [
  [0, 0, 255],
  [255, 56, 56],
  [72, 249, 10],
  [255, 157, 151],
  [0, 194, 255],
  [255, 178, 29],
  [146, 204, 23],
  [132, 56, 255],
];

pub struct Draw {
  thickness: u32,
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      thickness: BOX_THICKNESS,
    }
  }
}

impl Draw {
  pub fn with_thickness(mut self, thickness: u32) -> Self {
    self.thickness = thickness.max(1);
    self
  }

  pub fn color_of(class_id: u32) -> Rgb<u8> {
    Rgb(PALETTE[class_id as usize % PALETTE.len()])
  }

  /// 在原图副本上绘制检测框，坐标为原图像素
  pub fn draw_detection(&self, image: &RgbImage, result: &[Detection]) -> RgbImage {
    let mut canvas = image.clone();
    for det in result {
      self.draw_bbox(&mut canvas, det);
    }
    canvas
  }

  fn draw_bbox(&self, image: &mut RgbImage, det: &Detection) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let x_min = (det.bbox.x.floor() as i32).clamp(0, w - 1);
    let y_min = (det.bbox.y.floor() as i32).clamp(0, h - 1);
    let x_max = (det.bbox.right().ceil() as i32).clamp(0, w - 1);
    let y_max = (det.bbox.bottom().ceil() as i32).clamp(0, h - 1);

    let color = Self::color_of(det.class_id);
    // 向内加粗
    for t in 0..self.thickness as i32 {
      let width = x_max - x_min - 2 * t + 1;
      let height = y_max - y_min - 2 * t + 1;
      if width <= 0 || height <= 0 {
        break;
      }
      let rect = Rect::at(x_min + t, y_min + t).of_size(width as u32, height as u32);
      draw_hollow_rect_mut(image, rect, color);
    }
  }
}

/// 检测结果的文本记录格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Record {
  /// `类别编号, 置信度, x, y, w, h`
  Id,
  /// `类别名称, 置信度, x, y, w, h`
  Name,
  Json,
}

impl Record {
  pub fn extension(&self) -> &'static str {
    match self {
      Record::Id | Record::Name => "txt",
      Record::Json => "json",
    }
  }

  pub fn format<T: WithLabel>(&self, result: &[Detection]) -> String {
    match self {
      Record::Id | Record::Name => result
        .iter()
        .map(|det| {
          let name = if *self == Record::Name {
            det.label::<T>().to_label_str()
          } else {
            det.class_id.to_string()
          };
          format!(
            "{}, {:.4}, {:.2}, {:.2}, {:.2}, {:.2}",
            name, det.confidence, det.bbox.x, det.bbox.y, det.bbox.width, det.bbox.height
          )
        })
        .collect::<Vec<_>>()
        .join("\n"),
      Record::Json => {
        let items = result
          .iter()
          .map(|det| {
            serde_json::json!({
              "class_id": det.class_id,
              "label": det.label::<T>().to_label_str(),
              "confidence": det.confidence,
              "bbox": [det.bbox.x, det.bbox.y, det.bbox.width, det.bbox.height],
            })
          })
          .collect::<Vec<_>>();
        serde_json::Value::Array(items).to_string()
      }
    }
  }

  pub fn record<T: WithLabel>(
    &self,
    result: &[Detection],
    path: &std::path::Path,
  ) -> Result<(), std::io::Error> {
    std::fs::write(path.with_extension(self.extension()), self.format::<T>(result))
  }
}
