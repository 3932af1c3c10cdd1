// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/rule.rs - 异常规则
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

use serde::Serialize;

use crate::model::Detection;

/// 计数规则：目标类别数量超过 `max_allowed` 即为异常
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleConfig {
  pub target_class: String,
  pub max_allowed: u32,
}

impl RuleConfig {
  pub fn new(target_class: impl Into<String>, max_allowed: u32) -> Self {
    Self {
      target_class: target_class.into(),
      max_allowed,
    }
  }
}

impl Default for RuleConfig {
  fn default() -> Self {
    Self::new("person", 2)
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleVerdict {
  pub is_anomaly: bool,
  pub matched_count: usize,
  /// 类别等于目标类别的检测结果，保持检测器给出的顺序
  pub triggering_detections: Vec<Detection>,
  /// `triggering_detections` 在输入检测集合中的下标，递增
  pub triggering_indices: Vec<usize>,
}

impl RuleVerdict {
  /// 按下标判断，不比较浮点字段
  pub fn is_triggering(&self, index: usize) -> bool {
    self.triggering_indices.binary_search(&index).is_ok()
  }
}

/// 对一帧的检测结果应用规则
///
/// 类别按字符串精确匹配（区分大小写），不再做置信度过滤。
pub fn evaluate(detections: &[Detection], config: &RuleConfig) -> RuleVerdict {
  let (triggering_indices, triggering_detections): (Vec<_>, Vec<_>) = detections
    .iter()
    .enumerate()
    .filter(|(_, d)| d.class_name == config.target_class)
    .map(|(i, d)| (i, d.clone()))
    .unzip();
  let matched_count = triggering_detections.len();

  RuleVerdict {
    is_anomaly: matched_count > config.max_allowed as usize,
    matched_count,
    triggering_detections,
    triggering_indices,
  }
}
