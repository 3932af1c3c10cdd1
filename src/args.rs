// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/args.rs - 项目参数配置
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

use std::{num::NonZeroU32, path::PathBuf};

use clap::{Parser, ValueEnum};
use thiserror::Error;
use tracing::Level;

use jingjie::{model::ModelSettings, rule::RuleConfig};

#[derive(Error, Debug, PartialEq)]
pub enum ArgsError {
  #[error("{name} 必须在 [0, 1] 范围内，实际为 {value}")]
  OutOfRange { name: &'static str, value: f32 },
  #[error("采样间隔必须至少为 1")]
  ZeroSampleStride,
  #[error("目标类别不能为空")]
  EmptyTargetClass,
  #[error("图像序列帧率必须为正数，实际为 {0}")]
  InvalidSequenceFps(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
  Error,
  Warn,
  Info,
  Debug,
  Trace,
}

impl From<LogLevel> for Level {
  fn from(level: LogLevel) -> Self {
    match level {
      LogLevel::Error => Level::ERROR,
      LogLevel::Warn => Level::WARN,
      LogLevel::Info => Level::INFO,
      LogLevel::Debug => Level::DEBUG,
      LogLevel::Trace => Level::TRACE,
    }
  }
}

/// Jingjie 视频异常检测
///
/// 按间隔采样视频帧，发现目标数量超限时保存标注帧并在标准输出写出一条 JSON 告警。
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
  /// 输入视频文件（或图像序列目录）
  #[arg(value_name = "VIDEO_PATH")]
  pub video_path: PathBuf,

  /// 异常帧保存目录
  #[arg(value_name = "FRAME_OUTPUT_DIR")]
  pub frame_output_dir: PathBuf,

  /// 模型描述
  /// 支持格式:
  /// - yolov5:///path/model.onnx
  /// - replay:///path/detections.json
  /// - 直接给出 ONNX 文件路径
  #[arg(long, default_value = "yolov5s.onnx", value_name = "MODEL")]
  pub model: String,

  /// 置信度阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.4, value_name = "THRESHOLD")]
  pub conf: f32,

  /// NMS IoU 阈值 (0.0 - 1.0)
  #[arg(long, default_value_t = 0.45, value_name = "THRESHOLD")]
  pub iou: f32,

  /// 每 N 帧处理一帧
  #[arg(long, default_value_t = 5, value_name = "N")]
  pub sample: u32,

  /// 计算设备（cpu、cuda 等，不可用时回退到 cpu）
  #[arg(long, default_value = "cpu", value_name = "DEVICE")]
  pub device: String,

  /// 日志级别
  #[arg(long, value_enum, default_value_t = LogLevel::Info)]
  pub log_level: LogLevel,

  /// 计数的目标类别
  #[arg(long, default_value = "person", value_name = "CLASS")]
  pub target_class: String,

  /// 目标类别允许的最大数量
  #[arg(long, default_value_t = 2, value_name = "COUNT")]
  pub max_allowed: u32,

  /// 标签字体文件（TTF/OTF），默认查找系统字体
  #[arg(long, value_name = "FONT")]
  pub font: Option<PathBuf>,

  /// 图像序列目录的帧率，用于生成时间戳
  #[arg(long, default_value_t = 25.0, value_name = "FPS")]
  pub sequence_fps: f64,
}

/// 校验后的运行参数
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
  pub model_settings: ModelSettings,
  pub rule: RuleConfig,
  pub sample_stride: NonZeroU32,
}

fn unit_interval(name: &'static str, value: f32) -> Result<f32, ArgsError> {
  if (0.0..=1.0).contains(&value) {
    Ok(value)
  } else {
    Err(ArgsError::OutOfRange { name, value })
  }
}

impl Args {
  pub fn validate(&self) -> Result<Settings, ArgsError> {
    let confidence = unit_interval("conf", self.conf)?;
    let iou = unit_interval("iou", self.iou)?;
    let sample_stride = NonZeroU32::new(self.sample).ok_or(ArgsError::ZeroSampleStride)?;
    if self.target_class.is_empty() {
      return Err(ArgsError::EmptyTargetClass);
    }
    if !(self.sequence_fps.is_finite() && self.sequence_fps > 0.0) {
      return Err(ArgsError::InvalidSequenceFps(self.sequence_fps));
    }

    Ok(Settings {
      model_settings: ModelSettings { confidence, iou },
      rule: RuleConfig::new(self.target_class.clone(), self.max_allowed),
      sample_stride,
    })
  }
}
