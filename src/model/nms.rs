// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model/nms.rs - 非极大值抑制
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

use std::cmp::Ordering;

use super::Detection;

/// 按类别做非极大值抑制
///
/// 结果按置信度从高到低排列；同类别中与更高分框 IoU 超过阈值的框被丢弃。
pub fn non_max_suppression(detections: &mut Vec<Detection>, iou_threshold: f32) {
  detections.sort_by(|a, b| {
    b.confidence
      .partial_cmp(&a.confidence)
      .unwrap_or(Ordering::Equal)
  });

  let mut kept = 0;
  for index in 0..detections.len() {
    let suppressed = (0..kept).any(|prev| {
      detections[prev].class_name == detections[index].class_name
        && detections[prev].bbox.iou(&detections[index].bbox) > iou_threshold
    });
    if !suppressed {
      detections.swap(kept, index);
      kept += 1;
    }
  }
  detections.truncate(kept);
}
