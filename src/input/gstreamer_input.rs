// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input/gstreamer_input.rs - GStreamer 视频文件输入
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

//! # GStreamer 视频输入
//!
//! 通过 `filesrc ! decodebin ! videoconvert ! appsink` 管道逐帧解码视频文件，
//! 输出 RGB 帧。
//!
//! 与实时流不同，这里处理的是离线文件：appsink 不同步时钟，也不丢帧，
//! 每一帧都会交给调用方。
//!
//! ## 系统依赖
//!
//! **Ubuntu/Debian:**
//! ```bash
//! sudo apt-get install libgstreamer1.0-dev libgstreamer-plugins-base1.0-dev
//! ```
//!
//! 在 `Cargo.toml` 中启用 `gstreamer_input` 特性。

use std::path::Path;

use gstreamer::{self as gst, prelude::*};
use gstreamer_app as gst_app;
use gstreamer_video as gst_video;
use image::RgbImage;
use tracing::{debug, info, warn};
use url::Url;

use super::{FrameSource, InputError};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, StreamMetadata},
};

const PIPELINE_DESCRIPTION: &str = "filesrc name=src ! decodebin ! videoconvert ! \
   video/x-raw,format=RGB ! appsink name=sink sync=false max-buffers=4";

// 解码出错时 appsink 不会收到 EOS，拉取帧必须限时并检查总线
const PREROLL_TIMEOUT: gst::ClockTime = gst::ClockTime::from_seconds(30);
const SAMPLE_POLL_INTERVAL: gst::ClockTime = gst::ClockTime::from_mseconds(500);

impl From<gst::glib::Error> for InputError {
  fn from(err: gst::glib::Error) -> Self {
    InputError::Unreadable(format!("GStreamer 错误: {}", err))
  }
}

impl From<gst::glib::BoolError> for InputError {
  fn from(err: gst::glib::BoolError) -> Self {
    InputError::Unreadable(format!("GStreamer 错误: {}", err))
  }
}

impl From<gst::StateChangeError> for InputError {
  fn from(err: gst::StateChangeError) -> Self {
    InputError::Unreadable(format!("GStreamer 状态切换错误: {}", err))
  }
}

/// GStreamer 视频输入
///
/// 管理 GStreamer 管道和 appsink，drop 时将管道切换到 `Null` 释放解码器。
pub struct GStreamerInput {
  pipeline: gst::Pipeline,
  appsink: gst_app::AppSink,
  metadata: StreamMetadata,
  frame_index: u64,
  last_timestamp_ms: Option<f64>,
}

impl FromUrlWithScheme for GStreamerInput {
  const SCHEME: &'static str = "gst";
}

impl FromUrl for GStreamerInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::Unsupported(format!(
        "期望输入方式 '{}', 实际输入方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }
    Self::open(Path::new(url.path()))
  }
}

impl Drop for GStreamerInput {
  fn drop(&mut self) {
    if let Err(e) = self.pipeline.set_state(gst::State::Null) {
      warn!("无法停止 GStreamer 管道: {}", e);
    } else {
      debug!("GStreamer 管道已释放");
    }
  }
}

impl GStreamerInput {
  pub fn open(path: &Path) -> Result<Self, InputError> {
    if !path.is_file() {
      return Err(InputError::NotFound(path.to_path_buf()));
    }

    gst::init()?;

    info!("GStreamer 管道: {}", PIPELINE_DESCRIPTION);
    let pipeline = gst::parse::launch(PIPELINE_DESCRIPTION)?
      .downcast::<gst::Pipeline>()
      .map_err(|_| InputError::Unreadable("无法创建 GStreamer 管道".to_string()))?;

    let source = pipeline
      .by_name("src")
      .ok_or_else(|| InputError::Unreadable("找不到 filesrc 元素".to_string()))?;
    source.set_property("location", path.to_string_lossy().as_ref());

    let appsink = pipeline
      .by_name("sink")
      .ok_or_else(|| InputError::Unreadable("找不到 appsink 元素".to_string()))?
      .downcast::<gst_app::AppSink>()
      .map_err(|_| InputError::Unreadable("无法转换为 appsink".to_string()))?;

    // 预滚完成后即可读取 caps；构造失败时先切回 Null
    let metadata = match Self::start(&pipeline, &appsink) {
      Ok(metadata) => metadata,
      Err(e) => {
        let _ = pipeline.set_state(gst::State::Null);
        return Err(e);
      }
    };

    info!(
      "视频属性: FPS={:.2}, 尺寸={}x{}, 总帧数={}",
      metadata.fps,
      metadata.width,
      metadata.height,
      metadata
        .total_frames
        .map(|n| n.to_string())
        .unwrap_or_else(|| "N/A".to_string())
    );

    Ok(Self {
      pipeline,
      appsink,
      metadata,
      frame_index: 0,
      last_timestamp_ms: None,
    })
  }

  fn start(
    pipeline: &gst::Pipeline,
    appsink: &gst_app::AppSink,
  ) -> Result<StreamMetadata, InputError> {
    pipeline.set_state(gst::State::Paused)?;

    let bus = pipeline
      .bus()
      .ok_or_else(|| InputError::Unreadable("GStreamer 管道没有消息总线".to_string()))?;
    let message = bus
      .timed_pop_filtered(
        PREROLL_TIMEOUT,
        &[
          gst::MessageType::AsyncDone,
          gst::MessageType::Error,
          gst::MessageType::Eos,
        ],
      )
      .ok_or_else(|| InputError::Unreadable("等待视频预滚超时".to_string()))?;
    match message.view() {
      gst::MessageView::Error(err) => {
        return Err(InputError::Unreadable(format!(
          "{} ({:?})",
          err.error(),
          err.debug()
        )));
      }
      gst::MessageView::Eos(..) => {
        return Err(InputError::Unreadable("视频中没有可解码的帧".to_string()));
      }
      _ => {}
    }

    let preroll = appsink
      .pull_preroll()
      .map_err(|_| InputError::Unreadable("无法获取首帧".to_string()))?;
    let caps = preroll
      .caps()
      .ok_or_else(|| InputError::Unreadable("首帧缺少 caps".to_string()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
      .map_err(|_| InputError::Unreadable("无法从 caps 获取视频信息".to_string()))?;

    let fps = info.fps();
    let fps = if fps.denom() > 0 && fps.numer() > 0 {
      fps.numer() as f64 / fps.denom() as f64
    } else {
      0.0
    };

    let total_frames = pipeline
      .query_duration::<gst::ClockTime>()
      .filter(|_| fps > 0.0)
      .map(|duration| (duration.nseconds() as f64 / 1e9 * fps).round() as u64);

    pipeline.set_state(gst::State::Playing)?;

    Ok(StreamMetadata {
      fps,
      width: info.width(),
      height: info.height(),
      total_frames,
    })
  }

  fn bus_error(pipeline: &gst::Pipeline) -> Option<String> {
    let bus = pipeline.bus()?;
    while let Some(message) = bus.pop() {
      if let gst::MessageView::Error(err) = message.view() {
        return Some(format!("{} ({:?})", err.error(), err.debug()));
      }
    }
    None
  }

  // 时间戳缺失或倒退时沿用推算值，保证单调递增
  fn timestamp_ms(&mut self, buffer: &gst::BufferRef) -> f64 {
    let estimated = if self.metadata.fps > 0.0 {
      self.frame_index as f64 * 1000.0 / self.metadata.fps
    } else {
      self.frame_index as f64
    };
    let timestamp = buffer
      .pts()
      .map(|pts| pts.nseconds() as f64 / 1e6)
      .unwrap_or(estimated);
    let timestamp = match self.last_timestamp_ms {
      Some(last) if timestamp <= last => last.max(estimated),
      _ => timestamp,
    };
    self.last_timestamp_ms = Some(timestamp);
    timestamp
  }
}

impl FrameSource for GStreamerInput {
  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    let sample = loop {
      if let Some(sample) = self.appsink.try_pull_sample(SAMPLE_POLL_INTERVAL) {
        break sample;
      }
      if self.appsink.is_eos() {
        debug!("视频流结束");
        return Ok(None);
      }
      if let Some(err) = Self::bus_error(&self.pipeline) {
        return Err(InputError::Decode(err));
      }
    };

    let buffer = sample
      .buffer()
      .ok_or_else(|| InputError::Decode("视频帧缺少缓冲区".to_string()))?;
    let caps = sample
      .caps()
      .ok_or_else(|| InputError::Decode("视频帧缺少 caps".to_string()))?;
    let info = gst_video::VideoInfo::from_caps(caps)
      .map_err(|_| InputError::Decode("无法从 caps 获取视频信息".to_string()))?;
    if info.format() != gst_video::VideoFormat::Rgb {
      return Err(InputError::Decode(format!(
        "不支持的视频格式: {:?}",
        info.format()
      )));
    }

    let width = info.width() as usize;
    let height = info.height() as usize;
    let stride = info.stride()[0] as usize;

    let map = buffer
      .map_readable()
      .map_err(|e| InputError::Decode(format!("无法映射缓冲区: {}", e)))?;
    let data = map.as_slice();

    let row_bytes = width * 3;
    let expected = stride * height.saturating_sub(1) + row_bytes;
    if data.len() < expected {
      return Err(InputError::Decode(format!(
        "缓冲区大小不匹配: 期望 {} 字节, 实际 {} 字节",
        expected,
        data.len()
      )));
    }

    // RGB 行按 4 字节对齐，需要逐行拷贝
    let mut pixels = Vec::with_capacity(row_bytes * height);
    for y in 0..height {
      let start = y * stride;
      pixels.extend_from_slice(&data[start..start + row_bytes]);
    }

    let image = RgbImage::from_raw(width as u32, height as u32, pixels)
      .ok_or_else(|| InputError::Decode("无法创建 RGB 图像".to_string()))?;

    let timestamp_ms = self.timestamp_ms(buffer);
    let frame = Frame::new(image, self.frame_index, timestamp_ms);
    self.frame_index += 1;

    Ok(Some(frame))
  }

  fn metadata(&self) -> StreamMetadata {
    self.metadata
  }
}
