// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/main.rs - 项目主程序
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

mod args;

use std::{
  process::ExitCode,
  sync::mpsc::{self, Receiver},
  thread,
  time::Duration,
};

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing::{Level, error, info, warn};

use jingjie::{
  input::open_video,
  model::{Device, DetectorWrapper},
  output::{AlertReporter, Draw},
  task::{AnomalyTask, RunOutcome, Task},
};

use args::Args;

const INTERRUPT_EXIT_CODE: u8 = 130;
const FORCE_EXIT_GRACE: Duration = Duration::from_secs(30);

fn install_interrupt_handler() -> Result<Receiver<()>> {
  let (tx, rx) = mpsc::channel();
  ctrlc::set_handler(move || {
    info!("收到中断信号，准备退出...");
    let _ = tx.send(());
    thread::spawn(|| {
      thread::sleep(FORCE_EXIT_GRACE);
      warn!("强制退出程序");
      std::process::exit(INTERRUPT_EXIT_CODE as i32);
    });
  })
  .context("无法注册 Ctrl-C 处理函数")?;
  Ok(rx)
}

fn load_draw(args: &Args) -> Result<Draw> {
  match &args.font {
    Some(path) => Draw::default()
      .with_font_file(path)
      .context("无法加载标签字体"),
    None => {
      let draw = Draw::default().with_system_font();
      if !draw.has_font() {
        warn!("未找到可用字体，标签只绘制底色");
      }
      Ok(draw)
    }
  }
}

fn run(args: Args) -> Result<RunOutcome> {
  let settings = args.validate().context("参数无效")?;

  info!("输入视频: {}", args.video_path.display());
  info!("输出目录: {}", args.frame_output_dir.display());
  info!("模型: {}", args.model);
  info!(
    "置信度阈值: {}, IoU 阈值: {}, 采样间隔: {}",
    settings.model_settings.confidence, settings.model_settings.iou, settings.sample_stride
  );

  if !args.video_path.exists() {
    bail!("输入视频不存在: {}", args.video_path.display());
  }
  if args.frame_output_dir.exists() && !args.frame_output_dir.is_dir() {
    bail!("输出路径不是目录: {}", args.frame_output_dir.display());
  }
  std::fs::create_dir_all(&args.frame_output_dir).with_context(|| {
    format!("无法创建输出目录: {}", args.frame_output_dir.display())
  })?;

  let device = Device::select(&args.device);
  info!("计算设备: {:?}", device);

  info!("正在加载模型...");
  let detector =
    DetectorWrapper::from_descriptor(&args.model, settings.model_settings).context("检测器初始化失败")?;
  let draw = load_draw(&args)?;
  let interrupt = install_interrupt_handler()?;

  let source = open_video(&args.video_path, args.sequence_fps).context("无法打开输入视频")?;
  let mut reporter = AlertReporter::stdout();

  let stats = AnomalyTask::new(&args.frame_output_dir)
    .with_rule(settings.rule)
    .with_sample_stride(settings.sample_stride)
    .with_model_settings(settings.model_settings)
    .with_draw(draw)
    .with_interrupt(interrupt)
    .run_task(source, detector, &mut reporter);

  stats.log_summary();
  Ok(stats.outcome)
}

fn main() -> ExitCode {
  let args = match Args::try_parse() {
    Ok(args) => args,
    Err(e) => {
      let _ = e.print();
      // --help 与 --version 正常退出
      return if e.use_stderr() {
        ExitCode::FAILURE
      } else {
        ExitCode::SUCCESS
      };
    }
  };

  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_max_level(Level::from(args.log_level))
    .init();

  match run(args) {
    Ok(RunOutcome::Interrupted) => ExitCode::from(INTERRUPT_EXIT_CODE),
    Ok(_) => ExitCode::SUCCESS,
    Err(e) => {
      error!("{:#}", e);
      ExitCode::FAILURE
    }
  }
}
