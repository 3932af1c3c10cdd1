// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/input.rs - 视频/图像序列输入
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

use thiserror::Error;

use crate::frame::{Frame, StreamMetadata};

#[cfg(feature = "image_sequence_input")]
mod image_sequence;
#[cfg(feature = "image_sequence_input")]
pub use self::image_sequence::{DEFAULT_SEQUENCE_FPS, ImageSequenceInput};

#[cfg(feature = "gstreamer_input")]
mod gstreamer_input;
#[cfg(feature = "gstreamer_input")]
pub use self::gstreamer_input::GStreamerInput;

/// 帧输入源
///
/// 按顺序产出有限个帧，帧序号与时间戳单调递增。
/// 输入源在 drop 时释放底层资源。
pub trait FrameSource {
  /// 读取下一帧，流结束时返回 `Ok(None)`
  fn next_frame(&mut self) -> Result<Option<Frame>, InputError>;

  /// 流的基本信息
  fn metadata(&self) -> StreamMetadata;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    (**self).next_frame()
  }

  fn metadata(&self) -> StreamMetadata {
    (**self).metadata()
  }
}

#[derive(Error, Debug)]
pub enum InputError {
  #[error("输入文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("无法读取输入: {0}")]
  Unreadable(String),
  #[error("解码错误: {0}")]
  Decode(String),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("不支持的输入: {0}")]
  Unsupported(String),
}

pub enum InputWrapper {
  #[cfg(feature = "gstreamer_input")]
  GStreamerInput(GStreamerInput),
  #[cfg(feature = "image_sequence_input")]
  ImageSequence(ImageSequenceInput),
}

impl FrameSource for InputWrapper {
  fn next_frame(&mut self) -> Result<Option<Frame>, InputError> {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.next_frame(),
      #[cfg(feature = "image_sequence_input")]
      InputWrapper::ImageSequence(input) => input.next_frame(),
    }
  }

  fn metadata(&self) -> StreamMetadata {
    match self {
      #[cfg(feature = "gstreamer_input")]
      InputWrapper::GStreamerInput(input) => input.metadata(),
      #[cfg(feature = "image_sequence_input")]
      InputWrapper::ImageSequence(input) => input.metadata(),
    }
  }
}

/// 打开输入源
///
/// 目录按图像序列读取，其余路径交给视频解码器。
/// `sequence_fps` 仅用于图像序列的时间戳。
pub fn open_video(path: &Path, sequence_fps: f64) -> Result<InputWrapper, InputError> {
  if !path.exists() {
    return Err(InputError::NotFound(path.to_path_buf()));
  }

  if path.is_dir() {
    #[cfg(feature = "image_sequence_input")]
    {
      let input = ImageSequenceInput::open(path)?.with_fps(sequence_fps);
      return Ok(InputWrapper::ImageSequence(input));
    }
    #[cfg(not(feature = "image_sequence_input"))]
    {
      let _ = sequence_fps;
      return Err(InputError::Unsupported(format!(
        "{} 是目录，但未启用 image_sequence_input 特性",
        path.display()
      )));
    }
  }

  #[cfg(feature = "gstreamer_input")]
  {
    let input = GStreamerInput::open(path)?;
    Ok(InputWrapper::GStreamerInput(input))
  }
  #[cfg(not(feature = "gstreamer_input"))]
  {
    Err(InputError::Unsupported(format!(
      "{} 需要视频解码，但未启用 gstreamer_input 特性",
      path.display()
    )))
  }
}
