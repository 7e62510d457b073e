// 该文件是 Shanan ONNX （山南西风） 项目的一部分。
// src/postprocess.rs - 检测结果后处理
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::collections::BTreeMap;

use tracing::debug;

use crate::{
  error::InferenceError,
  letterbox::Letterbox,
  model::Detection,
  tensor::Tensor,
};

/// 每个候选框前四个属性为 cx, cy, w, h
const BOX_ATTRS: usize = 4;

/// 输出张量中属性轴与候选轴的排列方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputLayout {
  /// `[1, 4 + C, N]`，YOLOv8 导出的默认布局
  AttributesFirst,
  /// `[1, N, 4 + C]`
  CandidatesFirst,
}

/// 输出张量的只读视图
#[derive(Debug, Clone, Copy)]
pub struct OutputView<'a> {
  data: &'a [f32],
  layout: OutputLayout,
  num_attrs: usize,
  num_candidates: usize,
}

impl<'a> OutputView<'a> {
  /// 解析输出张量形状，较小的一维视为属性轴
  pub fn decode(output: &'a Tensor) -> Result<Self, InferenceError> {
    let shape = output.shape();
    let (rows, cols) = match *shape {
      [1, rows, cols] => (rows, cols),
      [_, _, _] => {
        return Err(InferenceError::OutputLayout {
          shape: shape.to_vec(),
          reason: "只支持 batch = 1",
        });
      }
      _ => {
        return Err(InferenceError::OutputLayout {
          shape: shape.to_vec(),
          reason: "输出张量必须为三维",
        });
      }
    };

    let (layout, num_attrs, num_candidates) = if rows <= cols {
      (OutputLayout::AttributesFirst, rows, cols)
    } else {
      (OutputLayout::CandidatesFirst, cols, rows)
    };

    if num_attrs <= BOX_ATTRS {
      return Err(InferenceError::OutputLayout {
        shape: shape.to_vec(),
        reason: "属性数量不足以容纳边界框与类别分数",
      });
    }

    Ok(Self {
      data: output.data(),
      layout,
      num_attrs,
      num_candidates,
    })
  }

  pub fn layout(&self) -> OutputLayout {
    self.layout
  }

  pub fn num_classes(&self) -> usize {
    self.num_attrs - BOX_ATTRS
  }

  pub fn num_candidates(&self) -> usize {
    self.num_candidates
  }

  fn attr(&self, candidate: usize, attr: usize) -> f32 {
    match self.layout {
      OutputLayout::AttributesFirst => self.data[attr * self.num_candidates + candidate],
      OutputLayout::CandidatesFirst => self.data[candidate * self.num_attrs + attr],
    }
  }

  pub fn candidates(&self) -> impl Iterator<Item = RawDetectionCandidate<'a>> + '_ {
    (0..self.num_candidates).map(move |index| RawDetectionCandidate { view: *self, index })
  }
}

/// 模型输出中的一行：模型空间的中心点框加上各类别分数
#[derive(Debug, Clone, Copy)]
pub struct RawDetectionCandidate<'a> {
  view: OutputView<'a>,
  index: usize,
}

impl RawDetectionCandidate<'_> {
  /// (cx, cy, w, h)
  pub fn center_box(&self) -> (f32, f32, f32, f32) {
    (
      self.view.attr(self.index, 0),
      self.view.attr(self.index, 1),
      self.view.attr(self.index, 2),
      self.view.attr(self.index, 3),
    )
  }

  pub fn scores(&self) -> impl Iterator<Item = f32> + '_ {
    (BOX_ATTRS..self.view.num_attrs).map(|attr| self.view.attr(self.index, attr))
  }

  /// 最高分类别，分数相同时取编号较小者
  pub fn best_class(&self) -> Option<(u32, f32)> {
    let mut best: Option<(u32, f32)> = None;
    for (class_id, score) in self.scores().enumerate() {
      if score.is_nan() {
        continue;
      }
      if best.is_none_or(|(_, best_score)| score > best_score) {
        best = Some((class_id as u32, score));
      }
    }
    best
  }
}

/// 置信度过滤、坐标还原、按类别 NMS
pub fn postprocess(
  output: &Tensor,
  letterbox: &Letterbox,
  conf_threshold: f32,
  nms_threshold: f32,
) -> Result<Vec<Detection>, InferenceError> {
  let view = OutputView::decode(output)?;
  debug!(
    "输出布局 {:?}: {} 个候选框, {} 个类别",
    view.layout(),
    view.num_candidates(),
    view.num_classes()
  );

  let mut survivors = Vec::new();
  for candidate in view.candidates() {
    let Some((class_id, confidence)) = candidate.best_class() else {
      continue;
    };
    if confidence < conf_threshold {
      continue;
    }

    let (cx, cy, w, h) = candidate.center_box();
    if let Some(bbox) = letterbox.to_source_box(cx, cy, w, h) {
      survivors.push(Detection {
        class_id,
        confidence,
        bbox,
      });
    }
  }
  debug!("置信度过滤后剩余 {} 个候选框", survivors.len());

  let detections = non_max_suppression(survivors, nms_threshold);
  debug!("NMS 后剩余 {} 个检测结果", detections.len());

  Ok(detections)
}

/// 按类别分组的非极大值抑制
///
/// 结果按类别编号升序排列，每个类别内部按置信度降序；不同类别的框互不抑制。
pub fn non_max_suppression(detections: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
  let mut groups: BTreeMap<u32, Vec<Detection>> = BTreeMap::new();
  for det in detections {
    groups.entry(det.class_id).or_default().push(det);
  }

  groups
    .into_values()
    .flat_map(|group| suppress_class(group, nms_threshold))
    .collect()
}

fn suppress_class(mut group: Vec<Detection>, nms_threshold: f32) -> Vec<Detection> {
  // 稳定排序，置信度相同时保持原始顺序
  group.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

  let mut kept: Vec<Detection> = Vec::with_capacity(group.len());
  for det in group {
    if kept
      .iter()
      .all(|best| best.bbox.iou(&det.bbox) <= nms_threshold)
    {
      kept.push(det);
    }
  }
  kept
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::BoundingBox;
  use proptest::prelude::*;

  fn det(class_id: u32, confidence: f32, x: f32, y: f32, w: f32, h: f32) -> Detection {
    Detection {
      class_id,
      confidence,
      bbox: BoundingBox {
        x,
        y,
        width: w,
        height: h,
      },
    }
  }

  /// 构造 `[1, 4 + C, N]` 输出，每行为 (cx, cy, w, h, scores...)
  fn attributes_first(rows: &[Vec<f32>], num_candidates: usize) -> Tensor {
    let num_attrs = rows[0].len();
    let mut data = vec![0.0; num_attrs * num_candidates];
    for (i, row) in rows.iter().enumerate() {
      for (a, value) in row.iter().enumerate() {
        data[a * num_candidates + i] = *value;
      }
    }
    Tensor::new(vec![1, num_attrs, num_candidates], data).unwrap()
  }

  fn landscape() -> Letterbox {
    Letterbox::compute(640, 480, 640, 640).unwrap()
  }

  #[test]
  fn maps_model_box_to_source_space() {
    let output = attributes_first(&[vec![320.0, 240.0, 100.0, 50.0, 0.1, 0.8]], 8);
    let dets = postprocess(&output, &landscape(), 0.5, 0.5).unwrap();

    assert_eq!(dets.len(), 1);
    assert_eq!(dets[0].class_id, 1);
    assert_eq!(dets[0].confidence, 0.8);
    assert_eq!(
      dets[0].bbox,
      BoundingBox {
        x: 270.0,
        y: 135.0,
        width: 100.0,
        height: 50.0
      }
    );
  }

  #[test]
  fn candidates_first_layout_is_decoded() {
    let mut data = vec![0.0f32; 8 * 6];
    data[..6].copy_from_slice(&[320.0, 240.0, 100.0, 50.0, 0.9, 0.0]);
    data[6..12].copy_from_slice(&[100.0, 200.0, 20.0, 20.0, 0.0, 0.7]);
    // 8 个候选框，6 个属性
    let output = Tensor::new(vec![1, 8, 6], data).unwrap();

    let view = OutputView::decode(&output).unwrap();
    assert_eq!(view.layout(), OutputLayout::CandidatesFirst);
    assert_eq!(view.num_classes(), 2);

    let dets = postprocess(&output, &landscape(), 0.5, 0.5).unwrap();
    assert_eq!(dets.len(), 2);
    assert_eq!(dets[0].class_id, 0);
    assert_eq!(dets[1].class_id, 1);
  }

  #[test]
  fn rejects_unexpected_shapes() {
    let batched = Tensor::zeros(vec![2, 6, 10]);
    assert!(OutputView::decode(&batched).is_err());
    let flat = Tensor::zeros(vec![60]);
    assert!(OutputView::decode(&flat).is_err());
    // 缺少 batch 维
    let unbatched = attributes_first(&[vec![320.0, 240.0, 100.0, 50.0, 0.9, 0.0]], 8);
    let (_, data) = unbatched.into_parts();
    let unbatched = Tensor::new(vec![6, 8], data).unwrap();
    assert!(matches!(
      postprocess(&unbatched, &landscape(), 0.5, 0.5),
      Err(InferenceError::OutputLayout { .. })
    ));
    let no_classes = Tensor::zeros(vec![1, 4, 10]);
    assert!(OutputView::decode(&no_classes).is_err());
  }

  #[test]
  fn all_below_threshold_is_empty() {
    let output = attributes_first(
      &[
        vec![320.0, 240.0, 100.0, 50.0, 0.1, 0.2],
        vec![100.0, 300.0, 10.0, 10.0, 0.3, 0.0],
      ],
      8,
    );
    let dets = postprocess(&output, &landscape(), 0.5, 0.5).unwrap();
    assert!(dets.is_empty());
  }

  #[test]
  fn degenerate_boxes_are_dropped() {
    // 完全落在上方填充区内
    let output = attributes_first(&[vec![320.0, 40.0, 100.0, 50.0, 0.9, 0.0]], 8);
    let dets = postprocess(&output, &landscape(), 0.5, 0.5).unwrap();
    assert!(dets.is_empty());
  }

  #[test]
  fn overlapping_same_class_keeps_best() {
    // IoU = 0.8
    let a = det(0, 0.9, 0.0, 0.0, 100.0, 100.0);
    let b = det(0, 0.6, 0.0, 0.0, 100.0, 80.0);
    assert!((a.bbox.iou(&b.bbox) - 0.8).abs() < 1e-6);

    let kept = non_max_suppression(vec![b, a.clone()], 0.5);
    assert_eq!(kept, vec![a]);
  }

  #[test]
  fn different_classes_never_suppress() {
    let a = det(0, 0.9, 10.0, 10.0, 50.0, 50.0);
    let b = det(3, 0.8, 10.0, 10.0, 50.0, 50.0);
    let kept = non_max_suppression(vec![b.clone(), a.clone()], 0.5);
    assert_eq!(kept, vec![a, b]);
  }

  #[test]
  fn iou_equal_to_threshold_is_kept() {
    let a = det(0, 0.9, 0.0, 0.0, 100.0, 100.0);
    let b = det(0, 0.6, 0.0, 0.0, 100.0, 50.0);
    let kept = non_max_suppression(vec![a, b], 0.5);
    assert_eq!(kept.len(), 2);
  }

  #[test]
  fn ties_keep_input_order() {
    let a = det(0, 0.7, 0.0, 0.0, 10.0, 10.0);
    let b = det(0, 0.7, 100.0, 0.0, 10.0, 10.0);
    let c = det(0, 0.7, 200.0, 0.0, 10.0, 10.0);
    let kept = non_max_suppression(vec![b.clone(), c.clone(), a.clone()], 0.5);
    assert_eq!(kept, vec![b, c, a]);
  }

  #[test]
  fn ties_suppress_later_candidate() {
    let first = det(2, 0.7, 0.0, 0.0, 10.0, 10.0);
    let second = det(2, 0.7, 1.0, 0.0, 10.0, 10.0);
    let kept = non_max_suppression(vec![first.clone(), second], 0.5);
    assert_eq!(kept, vec![first]);
  }

  fn arb_detection() -> impl Strategy<Value = Detection> {
    (0u32..3, 0.0f32..1.0, 0.0f32..200.0, 0.0f32..200.0, 1.0f32..80.0, 1.0f32..80.0)
      .prop_map(|(class_id, confidence, x, y, w, h)| det(class_id, confidence, x, y, w, h))
  }

  fn arb_rows() -> impl Strategy<Value = Vec<Vec<f32>>> {
    prop::collection::vec(
      (
        0.0f32..640.0,
        80.0f32..560.0,
        2.0f32..200.0,
        2.0f32..200.0,
        0.0f32..1.0,
        0.0f32..1.0,
      )
        .prop_map(|(cx, cy, w, h, s0, s1)| vec![cx, cy, w, h, s0, s1]),
      1..24,
    )
  }

  proptest! {
    #[test]
    fn nms_is_idempotent(
      dets in prop::collection::vec(arb_detection(), 0..40),
      threshold in 0.0f32..1.0,
    ) {
      let once = non_max_suppression(dets, threshold);
      let twice = non_max_suppression(once.clone(), threshold);
      prop_assert_eq!(once, twice);
    }

    #[test]
    fn raising_confidence_never_adds_detections(
      rows in arb_rows(),
      low in 0.0f32..1.0,
      delta in 0.0f32..0.5,
      nms in 0.0f32..1.0,
    ) {
      let output = attributes_first(&rows, 32);
      let lb = landscape();
      let loose = postprocess(&output, &lb, low, nms).unwrap();
      let strict = postprocess(&output, &lb, (low + delta).min(1.0), nms).unwrap();
      prop_assert!(strict.len() <= loose.len());
    }
  }
}
