// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/output/alert.rs - 告警记录
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

use std::io::Write;

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::{
  model::{Detection, ModelSettings},
  rule::{RuleConfig, RuleVerdict},
};

#[derive(Error, Debug)]
pub enum ReportError {
  #[error("告警序列化失败: {0}")]
  Serialize(#[from] serde_json::Error),
  #[error("告警写入失败: {0}")]
  IoError(#[from] std::io::Error),
  #[error("本次运行已输出过告警")]
  AlreadyEmitted,
}

/// 一次运行唯一的告警记录
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
  pub alert_type: String,
  pub message: String,
  pub frame_filename: String,
  pub details: AlertDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertDetails {
  pub timestamp_ms: f64,
  /// 在视频中的帧序号（从 1 开始）
  pub frame_number_original: u64,
  /// 在采样帧中的序号（从 1 开始）
  pub frame_number_processed: u64,
  pub rule_config: RuleConfig,
  pub detection_summary: DetectionSummary,
  pub model_settings_used: ModelSettings,
  pub triggering_objects_bboxes: Vec<TriggeringObject>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DetectionSummary {
  pub anomaly_trigger_class_count: usize,
  pub total_objects_detected_in_frame: usize,
}

/// 触发告警的目标，坐标取整到像素
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TriggeringObject {
  pub class_name: String,
  pub confidence: f32,
  pub xmin: i32,
  pub ymin: i32,
  pub xmax: i32,
  pub ymax: i32,
}

impl From<&Detection> for TriggeringObject {
  fn from(detection: &Detection) -> Self {
    let bbox = &detection.bbox;
    Self {
      class_name: detection.class_name.clone(),
      confidence: detection.confidence,
      xmin: bbox.xmin.round() as i32,
      ymin: bbox.ymin.round() as i32,
      xmax: bbox.xmax.round() as i32,
      ymax: bbox.ymax.round() as i32,
    }
  }
}

/// 触发帧的上下文，用于构造告警
pub struct TriggerContext<'a> {
  pub frame_filename: String,
  pub timestamp_ms: f64,
  pub frame_number_original: u64,
  pub frame_number_processed: u64,
  pub total_detections: usize,
  pub verdict: &'a RuleVerdict,
  pub rule: &'a RuleConfig,
  pub model_settings: ModelSettings,
}

impl AlertRecord {
  pub fn new(ctx: TriggerContext<'_>) -> Self {
    let class = &ctx.rule.target_class;
    Self {
      alert_type: format!("High Count: {}", class),
      message: format!(
        "Detected {} '{}' objects, exceeding limit of {}.",
        ctx.verdict.matched_count, class, ctx.rule.max_allowed
      ),
      frame_filename: ctx.frame_filename,
      details: AlertDetails {
        timestamp_ms: ctx.timestamp_ms,
        frame_number_original: ctx.frame_number_original,
        frame_number_processed: ctx.frame_number_processed,
        rule_config: ctx.rule.clone(),
        detection_summary: DetectionSummary {
          anomaly_trigger_class_count: ctx.verdict.matched_count,
          total_objects_detected_in_frame: ctx.total_detections,
        },
        model_settings_used: ctx.model_settings,
        triggering_objects_bboxes: ctx
          .verdict
          .triggering_detections
          .iter()
          .map(TriggeringObject::from)
          .collect(),
      },
    }
  }
}

/// 把告警写成一行 JSON
///
/// 每个输出器只接受一次 `emit`。
pub struct AlertReporter<W: Write> {
  writer: W,
  emitted: bool,
}

impl AlertReporter<std::io::Stdout> {
  pub fn stdout() -> Self {
    Self::new(std::io::stdout())
  }
}

impl<W: Write> AlertReporter<W> {
  pub fn new(writer: W) -> Self {
    Self {
      writer,
      emitted: false,
    }
  }

  pub fn has_emitted(&self) -> bool {
    self.emitted
  }

  pub fn emit(&mut self, record: &AlertRecord) -> Result<(), ReportError> {
    if self.emitted {
      return Err(ReportError::AlreadyEmitted);
    }
    // 先在内存中完成序列化，失败时不写出任何字节
    let line = serde_json::to_string(record)?;
    self.emitted = true;
    writeln!(self.writer, "{}", line)?;
    self.writer.flush()?;
    info!("已输出告警: {}", record.alert_type);
    Ok(())
  }

  pub fn into_inner(self) -> W {
    self.writer
  }
}
