// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/output/save_image_file.rs - 保存异常帧
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
  fs::File,
  io::{BufWriter, Write},
  path::Path,
};

use image::{RgbImage, codecs::jpeg::JpegEncoder};
use thiserror::Error;
use tracing::{info, warn};

/// JPEG 编码质量，固定以保证多次运行结果一致
pub const JPEG_QUALITY: u8 = 95;

const FILENAME_PREFIX: &str = "processed_frame";

#[derive(Error, Debug)]
pub enum SaveImageFileError {
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
  #[error("图像错误: {0}")]
  ImageError(#[from] image::ImageError),
}

/// 由帧序号和时间戳生成文件名
///
/// 形如 `processed_frame_000004_0000000133.jpg`，时间戳取整数毫秒。
pub fn frame_filename(frame_number: u64, timestamp_ms: f64) -> String {
  let timestamp = if timestamp_ms.is_finite() && timestamp_ms > 0.0 {
    timestamp_ms as u64
  } else {
    0
  };
  format!("{}_{:06}_{:010}.jpg", FILENAME_PREFIX, frame_number, timestamp)
}

/// 异常帧持久化
///
/// 只返回文件名，由调用方负责拼接目录。
#[derive(Debug, Clone, Copy)]
pub struct SaveImageFile {
  quality: u8,
}

impl Default for SaveImageFile {
  fn default() -> Self {
    Self {
      quality: JPEG_QUALITY,
    }
  }
}

impl SaveImageFile {
  pub fn save(
    &self,
    image: &RgbImage,
    output_dir: &Path,
    frame_number: u64,
    timestamp_ms: f64,
  ) -> Result<String, SaveImageFileError> {
    std::fs::create_dir_all(output_dir)?;

    let filename = frame_filename(frame_number, timestamp_ms);
    let path = output_dir.join(&filename);
    // 先写临时文件再改名，目标文件要么完整要么不存在
    let temp_path = output_dir.join(format!(".{}.partial", filename));

    if let Err(e) = self.write_jpeg(image, &temp_path) {
      if let Err(cleanup) = std::fs::remove_file(&temp_path) {
        warn!("无法清理临时文件 {}: {}", temp_path.display(), cleanup);
      }
      return Err(e);
    }
    std::fs::rename(&temp_path, &path)?;

    info!("保存异常帧到文件: {}", path.display());
    Ok(filename)
  }

  fn write_jpeg(&self, image: &RgbImage, path: &Path) -> Result<(), SaveImageFileError> {
    let mut writer = BufWriter::new(File::create(path)?);
    JpegEncoder::new_with_quality(&mut writer, self.quality).encode_image(image)?;
    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(())
  }
}
