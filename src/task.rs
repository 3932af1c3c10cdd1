// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/task.rs - 异常检测任务
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

use std::{
  io::Write,
  num::NonZeroU32,
  path::PathBuf,
  sync::mpsc::Receiver,
  time::{Duration, Instant},
};

use tracing::{debug, error, info, warn};

use crate::{
  frame::Frame,
  input::FrameSource,
  model::{Detector, ModelSettings},
  output::{AlertRecord, AlertReporter, Draw, SaveImageFile, TriggerContext},
  rule::{RuleConfig, evaluate},
};

const PROGRESS_INTERVAL: u64 = 100;

pub trait Task<I, M, O>: Sized {
  type Summary;
  fn run_task(self, input: I, model: M, output: O) -> Self::Summary;
}

/// 运行中止的原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
  /// 读取或解码帧失败
  Read,
  /// 检测器报错
  Detector,
  /// 异常帧保存失败
  Persistence,
  /// 告警写出失败
  Report,
}

/// 运行的终止状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
  AnomalyReported,
  Exhausted,
  Aborted(AbortReason),
  Interrupted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
  Init,
  Streaming,
  Finished(RunOutcome),
}

/// 一次运行的统计，只写入日志
#[derive(Debug, Clone, PartialEq)]
pub struct RunStats {
  pub frames_read: u64,
  pub frames_sampled: u64,
  pub duration: Duration,
  pub anomaly_found: bool,
  pub outcome: RunOutcome,
}

impl Default for RunStats {
  fn default() -> Self {
    Self {
      frames_read: 0,
      frames_sampled: 0,
      duration: Duration::ZERO,
      anomaly_found: false,
      outcome: RunOutcome::Exhausted,
    }
  }
}

impl RunStats {
  pub fn log_summary(&self) {
    info!("处理结束: {:?}", self.outcome);
    info!("读取帧数: {}", self.frames_read);
    info!("采样帧数: {}", self.frames_sampled);
    info!("处理耗时: {:.2?}", self.duration);
    if !self.anomaly_found {
      info!("未发现异常");
    }
  }
}

/// 逐帧采样检测，发现第一个异常后保存帧、输出告警并停止
pub struct AnomalyTask {
  rule: RuleConfig,
  sample_stride: NonZeroU32,
  output_dir: PathBuf,
  model_settings: ModelSettings,
  draw: Draw,
  persister: SaveImageFile,
  interrupt: Option<Receiver<()>>,
}

impl AnomalyTask {
  pub fn new(output_dir: impl Into<PathBuf>) -> Self {
    Self {
      rule: RuleConfig::default(),
      sample_stride: NonZeroU32::MIN,
      output_dir: output_dir.into(),
      model_settings: ModelSettings::default(),
      draw: Draw::default(),
      persister: SaveImageFile::default(),
      interrupt: None,
    }
  }

  pub fn with_rule(mut self, rule: RuleConfig) -> Self {
    self.rule = rule;
    self
  }

  pub fn with_sample_stride(mut self, sample_stride: NonZeroU32) -> Self {
    self.sample_stride = sample_stride;
    self
  }

  /// 仅用于告警中的 `model_settings_used`
  pub fn with_model_settings(mut self, model_settings: ModelSettings) -> Self {
    self.model_settings = model_settings;
    self
  }

  pub fn with_draw(mut self, draw: Draw) -> Self {
    self.draw = draw;
    self
  }

  /// 每帧之前检查一次，收到消息即停止
  pub fn with_interrupt(mut self, interrupt: Receiver<()>) -> Self {
    self.interrupt = Some(interrupt);
    self
  }

  fn interrupted(&self) -> bool {
    self
      .interrupt
      .as_ref()
      .map(|rx| rx.try_recv().is_ok())
      .unwrap_or(false)
  }

  fn step<S, D, W>(
    &self,
    source: &mut S,
    detector: &mut D,
    reporter: &mut AlertReporter<W>,
    stats: &mut RunStats,
  ) -> TaskState
  where
    S: FrameSource,
    D: Detector,
    D::Error: std::error::Error,
    W: Write,
  {
    if self.interrupted() {
      warn!("中断信号接收，退出任务循环");
      return TaskState::Finished(RunOutcome::Interrupted);
    }

    let frame = match source.next_frame() {
      Ok(Some(frame)) => frame,
      Ok(None) => {
        info!("视频读取完毕");
        return TaskState::Finished(RunOutcome::Exhausted);
      }
      Err(e) => {
        error!("读取第 {} 帧失败: {}", stats.frames_read + 1, e);
        return TaskState::Finished(RunOutcome::Aborted(AbortReason::Read));
      }
    };

    stats.frames_read += 1;
    if stats.frames_read % self.sample_stride.get() as u64 != 0 {
      return TaskState::Streaming;
    }
    stats.frames_sampled += 1;

    let state = self.process_frame(&frame, detector, reporter, stats);
    if state == TaskState::Streaming && stats.frames_sampled % PROGRESS_INTERVAL == 0 {
      info!(
        "已处理 {} 个采样帧（读取 {} 帧）",
        stats.frames_sampled, stats.frames_read
      );
    }
    state
  }

  fn process_frame<D, W>(
    &self,
    frame: &Frame,
    detector: &mut D,
    reporter: &mut AlertReporter<W>,
    stats: &mut RunStats,
  ) -> TaskState
  where
    D: Detector,
    D::Error: std::error::Error,
    W: Write,
  {
    let detections = match detector.detect(&frame.image) {
      Ok(detections) => detections,
      Err(e) => {
        error!("第 {} 帧检测失败: {}", stats.frames_read, e);
        return TaskState::Finished(RunOutcome::Aborted(AbortReason::Detector));
      }
    };

    let verdict = evaluate(&detections, &self.rule);
    debug!(
      "第 {} 帧: {} 个目标, '{}' {} 个",
      stats.frames_read,
      detections.len(),
      self.rule.target_class,
      verdict.matched_count
    );
    if !verdict.is_anomaly {
      return TaskState::Streaming;
    }

    warn!(
      "第 {} 帧发现异常: '{}' 数量 {} 超过上限 {}",
      stats.frames_read, self.rule.target_class, verdict.matched_count, self.rule.max_allowed
    );

    let annotated = self.draw.annotate(&frame.image, &detections, &verdict);
    let frame_filename = match self.persister.save(
      &annotated,
      &self.output_dir,
      stats.frames_read,
      frame.timestamp_ms,
    ) {
      Ok(filename) => filename,
      Err(e) => {
        error!("保存异常帧失败: {}", e);
        return TaskState::Finished(RunOutcome::Aborted(AbortReason::Persistence));
      }
    };

    let record = AlertRecord::new(TriggerContext {
      frame_filename,
      timestamp_ms: frame.timestamp_ms,
      frame_number_original: stats.frames_read,
      frame_number_processed: stats.frames_sampled,
      total_detections: detections.len(),
      verdict: &verdict,
      rule: &self.rule,
      model_settings: self.model_settings,
    });
    if let Err(e) = reporter.emit(&record) {
      error!("输出告警失败: {}", e);
      return TaskState::Finished(RunOutcome::Aborted(AbortReason::Report));
    }

    stats.anomaly_found = true;
    TaskState::Finished(RunOutcome::AnomalyReported)
  }
}

impl<'a, S, D, W> Task<S, D, &'a mut AlertReporter<W>> for AnomalyTask
where
  S: FrameSource,
  D: Detector,
  D::Error: std::error::Error,
  W: Write,
{
  type Summary = RunStats;

  fn run_task(self, mut input: S, mut model: D, output: &'a mut AlertReporter<W>) -> RunStats {
    let start = Instant::now();
    let mut stats = RunStats::default();
    let mut state = TaskState::Init;

    let outcome = loop {
      state = match state {
        TaskState::Init => {
          let metadata = input.metadata();
          info!(
            "开始任务: {}x{} @ {:.2} fps, 总帧数 {}",
            metadata.width,
            metadata.height,
            metadata.fps,
            metadata
              .total_frames
              .map(|n| n.to_string())
              .unwrap_or_else(|| "未知".to_string())
          );
          info!(
            "采样间隔 {}, 规则: '{}' 最多 {} 个",
            self.sample_stride, self.rule.target_class, self.rule.max_allowed
          );
          TaskState::Streaming
        }
        TaskState::Streaming => self.step(&mut input, &mut model, output, &mut stats),
        TaskState::Finished(outcome) => break outcome,
      };
    };

    drop(input);
    info!("输入源已释放");

    stats.duration = start.elapsed();
    stats.outcome = outcome;
    stats
  }
}
