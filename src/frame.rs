// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/frame.rs - 视频帧定义
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

use image::RgbImage;

/// 从输入源读出的一帧
///
/// 像素按 RGB 顺序排列（HWC，8 位）。
#[derive(Debug, Clone)]
pub struct Frame {
  /// RGB 图像数据
  pub image: RgbImage,
  /// 帧在流中的位置（从 0 开始）
  pub index: u64,
  /// 显示时间戳（毫秒）
  pub timestamp_ms: f64,
}

impl Frame {
  pub fn new(image: RgbImage, index: u64, timestamp_ms: f64) -> Self {
    Self {
      image,
      index,
      timestamp_ms,
    }
  }

  pub fn width(&self) -> u32 {
    self.image.width()
  }

  pub fn height(&self) -> u32 {
    self.image.height()
  }
}

/// 输入流的基本信息
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamMetadata {
  pub fps: f64,
  pub width: u32,
  pub height: u32,
  /// 部分容器无法给出总帧数
  pub total_frames: Option<u64>,
}
