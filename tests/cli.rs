// 该文件是 Jingjie （警戒哨） 项目的一部分。
// tests/cli.rs - 命令行退出码与输出通道测试
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

#![cfg(feature = "image_sequence_input")]

use std::{
  path::{Path, PathBuf},
  process::{Command, Output},
};

use image::{Rgb, RgbImage};
use tempfile::TempDir;

/// 一个图像序列目录、一份回放记录和一个输出目录
struct Workspace {
  root: TempDir,
}

impl Workspace {
  fn new(frames: usize) -> Self {
    let root = tempfile::tempdir().unwrap();
    let frames_dir = root.path().join("frames");
    std::fs::create_dir(&frames_dir).unwrap();
    for i in 0..frames {
      RgbImage::from_pixel(64, 48, Rgb([20, 20, 20]))
        .save(frames_dir.join(format!("frame_{:03}.png", i)))
        .unwrap();
    }
    Self { root }
  }

  fn frames(&self) -> PathBuf {
    self.root.path().join("frames")
  }

  fn output(&self) -> PathBuf {
    self.root.path().join("out")
  }

  /// 第 k 次检测调用返回 `persons[k]` 个 person
  fn script(&self, persons: &[usize]) -> String {
    let script = persons
      .iter()
      .map(|&count| {
        (0..count)
          .map(|i| {
            serde_json::json!({
              "class_name": "person",
              "confidence": 0.75,
              "bbox": {"xmin": 2.0 + 12.0 * i as f64, "ymin": 8.0, "xmax": 12.0 + 12.0 * i as f64, "ymax": 40.0}
            })
          })
          .collect::<Vec<_>>()
      })
      .collect::<Vec<_>>();
    let path = self.root.path().join("detections.json");
    std::fs::write(&path, serde_json::to_string(&script).unwrap()).unwrap();
    format!("replay://{}", path.display())
  }
}

fn jingjie(video: &Path, output: &Path, extra: &[&str]) -> Output {
  Command::new(env!("CARGO_BIN_EXE_jingjie"))
    .arg(video)
    .arg(output)
    .args(extra)
    .output()
    .unwrap()
}

fn stdout(output: &Output) -> String {
  String::from_utf8(output.stdout.clone()).unwrap()
}

fn stderr(output: &Output) -> String {
  String::from_utf8_lossy(&output.stderr).into_owned()
}

#[test]
fn anomaly_is_one_json_line_and_exit_zero() {
  let ws = Workspace::new(6);
  let model = ws.script(&[0, 3, 0]);

  let output = jingjie(
    &ws.frames(),
    &ws.output(),
    &["--model", &model, "--sample", "2", "--max-allowed", "2"],
  );

  assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
  let out = stdout(&output);
  assert_eq!(out.lines().count(), 1, "stdout: {}", out);
  let record: serde_json::Value = serde_json::from_str(out.trim_end()).unwrap();
  assert_eq!(record["alert_type"], "High Count: person");
  assert_eq!(record["details"]["frame_number_original"], 4);
  assert_eq!(record["details"]["frame_number_processed"], 2);
  let filename = record["frame_filename"].as_str().unwrap();
  assert!(ws.output().join(filename).is_file());

  // 日志只写到 stderr
  let err = stderr(&output);
  assert!(err.contains("开始任务"), "stderr: {}", err);
  assert!(!out.contains("开始任务"));
}

#[test]
fn no_anomaly_exits_zero_with_silent_stdout() {
  let ws = Workspace::new(4);
  let model = ws.script(&[1, 1, 1, 1]);

  let output = jingjie(&ws.frames(), &ws.output(), &["--model", &model, "--sample", "1"]);

  assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
  assert!(output.stdout.is_empty());
  assert!(stderr(&output).contains("未发现异常"));
  assert_eq!(std::fs::read_dir(ws.output()).unwrap().count(), 0);
}

#[test]
fn unreadable_frame_is_contained_with_exit_zero() {
  let ws = Workspace::new(2);
  std::fs::write(ws.frames().join("frame_001.png"), b"not a png").unwrap();
  let model = ws.script(&[0, 5]);

  let output = jingjie(&ws.frames(), &ws.output(), &["--model", &model, "--sample", "1"]);

  assert_eq!(output.status.code(), Some(0), "stderr: {}", stderr(&output));
  assert!(output.stdout.is_empty());
}

#[test]
fn setup_failures_exit_one_without_stdout() {
  let ws = Workspace::new(2);
  let model = ws.script(&[0, 0]);
  let blocker = ws.root.path().join("blocker");
  std::fs::write(&blocker, b"x").unwrap();
  let missing_script = format!("replay://{}", ws.root.path().join("none.json").display());

  let cases: Vec<(PathBuf, PathBuf, Vec<&str>)> = vec![
    (ws.root.path().join("missing.mp4"), ws.output(), vec!["--model", model.as_str()]),
    (ws.frames(), ws.output(), vec!["--model", model.as_str(), "--conf", "1.5"]),
    (ws.frames(), ws.output(), vec!["--model", model.as_str(), "--sample", "0"]),
    (ws.frames(), ws.output(), vec!["--model", model.as_str(), "--sample", "abc"]),
    (ws.frames(), ws.output(), vec!["--model", missing_script.as_str()]),
    (ws.frames(), blocker.clone(), vec!["--model", model.as_str()]),
  ];

  for (video, out_dir, extra) in cases {
    let output = jingjie(&video, &out_dir, &extra);
    assert_eq!(
      output.status.code(),
      Some(1),
      "args {:?}, stderr: {}",
      extra,
      stderr(&output)
    );
    assert!(output.stdout.is_empty(), "args {:?}", extra);
    assert!(!output.stderr.is_empty(), "args {:?}", extra);
  }
}

#[test]
fn help_exits_zero() {
  let output = Command::new(env!("CARGO_BIN_EXE_jingjie"))
    .arg("--help")
    .output()
    .unwrap();
  assert_eq!(output.status.code(), Some(0));
}
