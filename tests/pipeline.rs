// 该文件是 Jingjie （警戒哨） 项目的一部分。
// tests/pipeline.rs - 异常检测流程测试
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
  cell::{Cell, RefCell},
  collections::HashMap,
  num::NonZeroU32,
  path::Path,
  rc::Rc,
  sync::mpsc,
};

use image::{Rgb, RgbImage};
use jingjie::{
  frame::{Frame, StreamMetadata},
  input::{FrameSource, InputError},
  model::{BBox, Detection, Detector, ModelError},
  output::AlertReporter,
  rule::RuleConfig,
  task::{AbortReason, AnomalyTask, RunOutcome, RunStats, Task},
};

const FRAME_INTERVAL_MS: f64 = 40.0;

/// 内存中的帧源，帧序号写在 (0, 0) 像素的红色通道里
struct StubSource {
  total: u64,
  next: u64,
  fail_at: Option<u64>,
  released: Rc<Cell<bool>>,
}

impl StubSource {
  fn new(total: u64) -> (Self, Rc<Cell<bool>>) {
    let released = Rc::new(Cell::new(false));
    let source = Self {
      total,
      next: 0,
      fail_at: None,
      released: released.clone(),
    };
    (source, released)
  }

  fn failing_at(mut self, ordinal: u64) -> Self {
    self.fail_at = Some(ordinal);
    self
  }
}

impl FrameSource for StubSource {
  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    if self.next >= self.total {
      return Ok(None);
    }
    let index = self.next;
    self.next += 1;
    if self.fail_at == Some(index + 1) {
      return Err(InputError::Decode(format!("frame {}", index)));
    }
    let mut image = RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]));
    image.put_pixel(0, 0, Rgb([index as u8, 0, 0]));
    Ok(Some(Frame::new(
      image,
      index,
      index as f64 * FRAME_INTERVAL_MS,
    )))
  }

  fn metadata(&self) -> StreamMetadata {
    StreamMetadata {
      fps: 1000.0 / FRAME_INTERVAL_MS,
      width: 64,
      height: 48,
      total_frames: Some(self.total),
    }
  }
}

impl Drop for StubSource {
  fn drop(&mut self) {
    self.released.set(true);
  }
}

/// 按帧序号（从 1 开始）给出预设结果的检测器
#[derive(Default)]
struct ScriptedDetector {
  persons_at: HashMap<u64, usize>,
  fail_at: Option<u64>,
  calls: Rc<RefCell<Vec<u64>>>,
}

impl ScriptedDetector {
  fn with_persons(mut self, ordinal: u64, count: usize) -> Self {
    self.persons_at.insert(ordinal, count);
    self
  }

  fn failing_at(mut self, ordinal: u64) -> Self {
    self.fail_at = Some(ordinal);
    self
  }

  fn calls(&self) -> Rc<RefCell<Vec<u64>>> {
    self.calls.clone()
  }
}

impl Detector for ScriptedDetector {
  type Error = ModelError;

  fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    let ordinal = image.get_pixel(0, 0)[0] as u64 + 1;
    self.calls.borrow_mut().push(ordinal);
    if self.fail_at == Some(ordinal) {
      return Err(ModelError::InferenceError(format!("frame {}", ordinal)));
    }
    let persons = self.persons_at.get(&ordinal).copied().unwrap_or(0);
    let mut detections = (0..persons)
      .map(|i| {
        let x = 4.0 + i as f32 * 10.0;
        Detection::new("person", 0.9, BBox::new(x, 10.0, x + 8.0, 40.0))
      })
      .collect::<Vec<_>>();
    detections.push(Detection::new("car", 0.7, BBox::new(40.0, 5.0, 60.0, 20.0)));
    Ok(detections)
  }
}

struct RunResult {
  stats: RunStats,
  stdout: String,
  released: bool,
}

fn run(
  source: StubSource,
  released: Rc<Cell<bool>>,
  detector: ScriptedDetector,
  stride: u32,
  max_allowed: u32,
  output_dir: &Path,
) -> RunResult {
  let mut reporter = AlertReporter::new(Vec::new());
  let stats = AnomalyTask::new(output_dir)
    .with_rule(RuleConfig::new("person", max_allowed))
    .with_sample_stride(NonZeroU32::new(stride).unwrap())
    .run_task(source, detector, &mut reporter);
  RunResult {
    stats,
    stdout: String::from_utf8(reporter.into_inner()).unwrap(),
    released: released.get(),
  }
}

fn saved_files(dir: &Path) -> Vec<String> {
  let mut names = std::fs::read_dir(dir)
    .map(|entries| {
      entries
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
    })
    .unwrap_or_default();
  names.sort();
  names
}

#[test]
fn sampled_ordinals_are_exact_multiples_of_stride() {
  for stride in 1..=4u32 {
    let dir = tempfile::tempdir().unwrap();
    let (source, released) = StubSource::new(10);
    let detector = ScriptedDetector::default();
    let calls = detector.calls();

    let result = run(source, released, detector, stride, 2, dir.path());

    let expected = (1..=10u64)
      .filter(|n| n % stride as u64 == 0)
      .collect::<Vec<_>>();
    assert_eq!(*calls.borrow(), expected, "stride {}", stride);
    assert_eq!(result.stats.frames_read, 10);
    assert_eq!(result.stats.frames_sampled, expected.len() as u64);
    assert_eq!(result.stats.outcome, RunOutcome::Exhausted);
    assert!(!result.stats.anomaly_found);
    assert!(result.stdout.is_empty());
    assert!(result.released);
  }
}

#[test]
fn stride_larger_than_video_samples_nothing() {
  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(3);
  let detector = ScriptedDetector::default().with_persons(3, 5);
  let calls = detector.calls();

  let result = run(source, released, detector, 5, 1, dir.path());

  assert!(calls.borrow().is_empty());
  assert_eq!(result.stats.frames_read, 3);
  assert_eq!(result.stats.frames_sampled, 0);
  assert!(result.stdout.is_empty());
}

#[test]
fn first_anomaly_wins() {
  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(10);
  let detector = ScriptedDetector::default()
    .with_persons(3, 3)
    .with_persons(4, 3)
    .with_persons(5, 3);
  let calls = detector.calls();

  let result = run(source, released, detector, 1, 1, dir.path());

  assert_eq!(result.stdout.lines().count(), 1);
  let record: serde_json::Value = serde_json::from_str(result.stdout.trim_end()).unwrap();
  assert_eq!(record["details"]["frame_number_original"], 3);
  assert_eq!(*calls.borrow(), vec![1, 2, 3]);
  assert_eq!(result.stats.outcome, RunOutcome::AnomalyReported);
  assert!(result.stats.anomaly_found);
  assert_eq!(result.stats.frames_read, 3);
  assert_eq!(saved_files(dir.path()).len(), 1);
  assert!(result.released);
}

#[test]
fn ten_frame_scenario_reports_frame_four() {
  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(10);
  let detector = ScriptedDetector::default().with_persons(4, 2);
  let calls = detector.calls();

  let result = run(source, released, detector, 2, 1, dir.path());

  assert_eq!(*calls.borrow(), vec![2, 4]);
  assert_eq!(result.stats.frames_read, 4);
  assert_eq!(result.stats.frames_sampled, 2);

  let files = saved_files(dir.path());
  assert_eq!(files, vec!["processed_frame_000004_0000000120.jpg".to_string()]);

  let record: serde_json::Value = serde_json::from_str(result.stdout.trim_end()).unwrap();
  assert_eq!(record["alert_type"], "High Count: person");
  assert_eq!(record["frame_filename"], files[0].as_str());
  let details = &record["details"];
  assert_eq!(details["frame_number_original"], 4);
  assert_eq!(details["frame_number_processed"], 2);
  assert_eq!(details["timestamp_ms"], 120.0);
  assert_eq!(details["detection_summary"]["anomaly_trigger_class_count"], 2);
  assert_eq!(
    details["detection_summary"]["total_objects_detected_in_frame"],
    3
  );
  assert_eq!(
    details["triggering_objects_bboxes"].as_array().unwrap().len(),
    2
  );

  // 保存的是标注后的帧
  let saved = image::open(dir.path().join(&files[0])).unwrap().to_rgb8();
  assert_eq!(saved.dimensions(), (64, 48));
  let edge = saved.get_pixel(5, 32);
  assert!(edge[0] > 150 && edge[1] < 100, "pixel {:?}", edge);
}

#[test]
fn empty_detections_complete_without_record() {
  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(12);

  let result = run(
    source,
    released,
    ScriptedDetector::default(),
    1,
    0,
    dir.path(),
  );

  assert_eq!(result.stats.outcome, RunOutcome::Exhausted);
  assert_eq!(result.stats.frames_sampled, 12);
  assert!(result.stdout.is_empty());
  assert!(saved_files(dir.path()).is_empty());
}

#[test]
fn detector_failure_halts_with_partial_stats() {
  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(20);
  let detector = ScriptedDetector::default().failing_at(7);

  let result = run(source, released, detector, 1, 2, dir.path());

  assert_eq!(
    result.stats.outcome,
    RunOutcome::Aborted(AbortReason::Detector)
  );
  assert_eq!(result.stats.frames_read, 7);
  assert!(!result.stats.anomaly_found);
  assert!(result.stdout.is_empty());
  assert!(result.released);
}

#[test]
fn read_failure_halts_without_skipping_ahead() {
  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(20);
  let source = source.failing_at(5);
  let detector = ScriptedDetector::default().with_persons(6, 9);
  let calls = detector.calls();

  let result = run(source, released, detector, 1, 2, dir.path());

  assert_eq!(result.stats.outcome, RunOutcome::Aborted(AbortReason::Read));
  assert_eq!(result.stats.frames_read, 4);
  assert_eq!(*calls.borrow(), vec![1, 2, 3, 4]);
  assert!(result.stdout.is_empty());
  assert!(result.released);
}

#[test]
fn persistence_failure_emits_no_record() {
  let dir = tempfile::tempdir().unwrap();
  let blocker = dir.path().join("not-a-dir");
  std::fs::write(&blocker, b"x").unwrap();
  let (source, released) = StubSource::new(5);
  let detector = ScriptedDetector::default().with_persons(2, 4);

  let result = run(source, released, detector, 1, 1, &blocker);

  assert_eq!(
    result.stats.outcome,
    RunOutcome::Aborted(AbortReason::Persistence)
  );
  assert!(!result.stats.anomaly_found);
  assert!(result.stdout.is_empty());
  assert!(result.released);
}

#[test]
fn filenames_are_deterministic_across_runs() {
  let first = tempfile::tempdir().unwrap();
  let second = tempfile::tempdir().unwrap();

  for dir in [first.path(), second.path()] {
    let (source, released) = StubSource::new(30);
    let detector = ScriptedDetector::default().with_persons(21, 4);
    run(source, released, detector, 3, 2, dir);
  }

  let names = saved_files(first.path());
  assert_eq!(names, vec!["processed_frame_000021_0000000800.jpg".to_string()]);
  assert_eq!(names, saved_files(second.path()));
}

#[test]
fn malformed_boxes_do_not_crash_the_run() {
  struct InvertedBoxes;
  impl Detector for InvertedBoxes {
    type Error = ModelError;
    fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
      Ok(vec![
        Detection::new("person", 0.8, BBox::new(50.0, 40.0, 10.0, 5.0)),
        Detection::new("person", 0.6, BBox::new(-20.0, f32::NAN, 500.0, 500.0)),
      ])
    }
  }

  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(3);
  let mut reporter = AlertReporter::new(Vec::new());
  let stats = AnomalyTask::new(dir.path())
    .with_rule(RuleConfig::new("person", 1))
    .run_task(source, InvertedBoxes, &mut reporter);

  assert_eq!(stats.outcome, RunOutcome::AnomalyReported);
  assert_eq!(stats.frames_read, 1);
  assert!(released.get());
  assert_eq!(saved_files(dir.path()).len(), 1);
  assert!(reporter.has_emitted());
}

#[test]
fn interrupt_stops_before_next_frame_and_releases_source() {
  let dir = tempfile::tempdir().unwrap();
  let (source, released) = StubSource::new(10);
  let detector = ScriptedDetector::default().with_persons(1, 5);
  let calls = detector.calls();
  let (tx, rx) = mpsc::channel();
  tx.send(()).unwrap();

  let mut reporter = AlertReporter::new(Vec::new());
  let stats = AnomalyTask::new(dir.path())
    .with_sample_stride(NonZeroU32::MIN)
    .with_interrupt(rx)
    .run_task(source, detector, &mut reporter);

  assert_eq!(stats.outcome, RunOutcome::Interrupted);
  assert_eq!(stats.frames_read, 0);
  assert!(calls.borrow().is_empty());
  assert!(released.get());
  assert!(!reporter.has_emitted());
}

#[test]
fn reused_reporter_refuses_second_record() {
  let dir = tempfile::tempdir().unwrap();
  let mut reporter = AlertReporter::new(Vec::new());

  for expected in [
    RunOutcome::AnomalyReported,
    RunOutcome::Aborted(AbortReason::Report),
  ] {
    let (source, _released) = StubSource::new(4);
    let detector = ScriptedDetector::default().with_persons(2, 3);
    let stats = AnomalyTask::new(dir.path())
      .with_rule(RuleConfig::new("person", 1))
      .run_task(source, detector, &mut reporter);
    assert_eq!(stats.outcome, expected);
  }

  let stdout = String::from_utf8(reporter.into_inner()).unwrap();
  assert_eq!(stdout.lines().count(), 1);
}
