// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input/image_sequence.rs - 图像序列输入
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

use std::path::{Path, PathBuf};

use image::ImageReader;
use tracing::{debug, info};
use url::Url;

use super::{FrameSource, InputError};
use crate::{
  FromUrl, FromUrlWithScheme,
  frame::{Frame, StreamMetadata},
};

pub const DEFAULT_SEQUENCE_FPS: f64 = 25.0;

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// 图像序列输入
///
/// 目录中的图像文件按文件名排序后逐一作为视频帧，
/// 时间戳由帧率推算。
pub struct ImageSequenceInput {
  files: Vec<PathBuf>,
  cursor: usize,
  fps: f64,
  width: u32,
  height: u32,
}

impl FromUrlWithScheme for ImageSequenceInput {
  const SCHEME: &'static str = "sequence";
}

impl FromUrl for ImageSequenceInput {
  type Error = InputError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(InputError::Unsupported(format!(
        "期望输入方式 '{}', 实际输入方式 '{}'",
        Self::SCHEME,
        url.scheme()
      )));
    }

    let fps = url
      .query_pairs()
      .find(|(k, _)| k == "fps")
      .and_then(|(_, v)| v.parse::<f64>().ok())
      .unwrap_or(DEFAULT_SEQUENCE_FPS);

    Ok(Self::open(Path::new(url.path()))?.with_fps(fps))
  }
}

impl ImageSequenceInput {
  pub fn open(directory: &Path) -> Result<Self, InputError> {
    if !directory.exists() {
      return Err(InputError::NotFound(directory.to_path_buf()));
    }

    let mut files = std::fs::read_dir(directory)
      .map_err(|e| InputError::Unreadable(format!("{}: {}", directory.display(), e)))?
      .filter_map(|entry| entry.ok().map(|e| e.path()))
      .filter(|path| path.is_file() && is_image_file(path))
      .collect::<Vec<_>>();
    files.sort();

    // 以首帧尺寸作为流尺寸
    let (width, height) = match files.first() {
      Some(first) => ImageReader::open(first)
        .map_err(|e| InputError::Unreadable(format!("{}: {}", first.display(), e)))?
        .with_guessed_format()?
        .into_dimensions()
        .map_err(|e| InputError::Unreadable(format!("{}: {}", first.display(), e)))?,
      None => (0, 0),
    };

    info!(
      "图像序列已打开: {} ({} 帧, {}x{})",
      directory.display(),
      files.len(),
      width,
      height
    );

    Ok(Self {
      files,
      cursor: 0,
      fps: DEFAULT_SEQUENCE_FPS,
      width,
      height,
    })
  }

  pub fn with_fps(mut self, fps: f64) -> Self {
    if fps.is_finite() && fps > 0.0 {
      self.fps = fps;
    }
    self
  }
}

impl FrameSource for ImageSequenceInput {
  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    let Some(path) = self.files.get(self.cursor) else {
      return Ok(None);
    };

    debug!("读取图像: {}", path.display());
    let image = ImageReader::open(path)?
      .with_guessed_format()?
      .decode()?
      .to_rgb8();

    let index = self.cursor as u64;
    let timestamp_ms = index as f64 * 1000.0 / self.fps;
    self.cursor += 1;

    Ok(Some(Frame::new(image, index, timestamp_ms)))
  }

  fn metadata(&self) -> StreamMetadata {
    StreamMetadata {
      fps: self.fps,
      width: self.width,
      height: self.height,
      total_frames: Some(self.files.len() as u64),
    }
  }
}

fn is_image_file(path: &Path) -> bool {
  path
    .extension()
    .and_then(|ext| ext.to_str())
    .map(|ext| {
      let ext = ext.to_ascii_lowercase();
      IMAGE_EXTENSIONS.contains(&ext.as_str())
    })
    .unwrap_or(false)
}
