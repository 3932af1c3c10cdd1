// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/output/draw.rs - 检测结果标注
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

use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{Rgb, RgbImage};
use imageproc::{
  drawing::{draw_filled_rect_mut, draw_text_mut, text_size},
  rect::Rect,
};
use thiserror::Error;
use tracing::{debug, info};

use crate::{
  model::{BBox, Detection},
  rule::RuleVerdict,
};

// 文本渲染常量
const LABEL_FONT_SIZE: f32 = 20.0;
const LABEL_TEXT_HEIGHT: i32 = 24;
const LABEL_CHAR_WIDTH: f32 = 11.0; // 每字符平均宽度（粗略估计）
const LABEL_TEXT_VERTICAL_PADDING: i32 = 2;
const LABEL_TEXT_COLOR: [u8; 3] = [255, 255, 255]; // 白色
const BOX_THICKNESS: i32 = 2;

pub const TRIGGERING_COLOR: [u8; 3] = [255, 0, 0]; // 红色
pub const DEFAULT_COLOR: [u8; 3] = [0, 255, 0]; // 绿色

/// 常见系统字体位置
const SYSTEM_FONT_CANDIDATES: [&str; 5] = [
  "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/dejavu/DejaVuSans.ttf",
  "/usr/share/fonts/TTF/DejaVuSans.ttf",
  "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
  "/System/Library/Fonts/Supplemental/Arial.ttf",
];

#[derive(Error, Debug)]
pub enum DrawError {
  #[error("无法读取字体文件 {0}: {1}")]
  FontIo(String, std::io::Error),
  #[error("字体文件无效: {0}")]
  InvalidFont(String),
}

/// 在帧的副本上绘制检测框与标签
///
/// 触发规则的检测使用 `TRIGGERING_COLOR`，其余使用 `DEFAULT_COLOR`。
/// 没有字体时只绘制边框和标签底色。
pub struct Draw {
  font: Option<FontVec>,
  font_size: f32,
  label_text_height: i32,
  label_char_width: f32,
  label_text_vertical_padding: i32,
  triggering_color: [u8; 3],
  default_color: [u8; 3],
}

impl Default for Draw {
  fn default() -> Self {
    Self {
      font: None,
      font_size: LABEL_FONT_SIZE,
      label_text_height: LABEL_TEXT_HEIGHT,
      label_char_width: LABEL_CHAR_WIDTH,
      label_text_vertical_padding: LABEL_TEXT_VERTICAL_PADDING,
      triggering_color: TRIGGERING_COLOR,
      default_color: DEFAULT_COLOR,
    }
  }
}

impl Draw {
  pub fn with_font(mut self, font: FontVec) -> Self {
    self.font = Some(font);
    self
  }

  pub fn with_font_file(self, path: &Path) -> Result<Self, DrawError> {
    let data =
      std::fs::read(path).map_err(|e| DrawError::FontIo(path.display().to_string(), e))?;
    let font = FontVec::try_from_vec(data)
      .map_err(|_| DrawError::InvalidFont(path.display().to_string()))?;
    info!("加载标签字体: {}", path.display());
    Ok(self.with_font(font))
  }

  /// 尝试加载系统字体，全部失败时保持无字体
  pub fn with_system_font(self) -> Self {
    for candidate in SYSTEM_FONT_CANDIDATES {
      let path = Path::new(candidate);
      if !path.is_file() {
        continue;
      }
      match std::fs::read(path)
        .ok()
        .and_then(|data| FontVec::try_from_vec(data).ok())
      {
        Some(font) => {
          info!("加载标签字体: {}", candidate);
          return self.with_font(font);
        }
        None => debug!("字体不可用: {}", candidate),
      }
    }
    self
  }

  pub fn has_font(&self) -> bool {
    self.font.is_some()
  }

  /// 返回标注后的副本，原图不变
  pub fn annotate(
    &self,
    image: &RgbImage,
    detections: &[Detection],
    verdict: &RuleVerdict,
  ) -> RgbImage {
    let mut canvas = image.clone();
    for (index, detection) in detections.iter().enumerate() {
      let color = if verdict.is_triggering(index) {
        self.triggering_color
      } else {
        self.default_color
      };
      let label = format!("{} {:.2}", detection.class_name, detection.confidence);
      self.draw_bbox_with_label(&mut canvas, &detection.bbox, &label, color);
    }
    canvas
  }

  // 非法边框（坐标颠倒、越界、NaN）一律钳制到图像范围内
  fn draw_bbox_with_label(&self, image: &mut RgbImage, bbox: &BBox, label: &str, color: [u8; 3]) {
    let (w, h) = (image.width() as i32, image.height() as i32);
    if w == 0 || h == 0 {
      return;
    }

    let (x_lo, x_hi) = ordered(bbox.xmin, bbox.xmax);
    let (y_lo, y_hi) = ordered(bbox.ymin, bbox.ymax);
    let x_min = (x_lo.floor() as i32).clamp(0, w - 1);
    let y_min = (y_lo.floor() as i32).clamp(0, h - 1);
    let x_max = (x_hi.ceil() as i32).clamp(0, w - 1);
    let y_max = (y_hi.ceil() as i32).clamp(0, h - 1);

    // 绘制边框（加粗为2像素）
    for thickness in 0..BOX_THICKNESS {
      let x_min_t = (x_min + thickness).min(x_max);
      let y_min_t = (y_min + thickness).min(y_max);
      let x_max_t = (x_max - thickness).max(x_min);
      let y_max_t = (y_max - thickness).max(y_min);

      for x in x_min_t..=x_max_t {
        image.put_pixel(x as u32, y_min_t as u32, Rgb(color));
        image.put_pixel(x as u32, y_max_t as u32, Rgb(color));
      }
      for y in y_min_t..=y_max_t {
        image.put_pixel(x_min_t as u32, y as u32, Rgb(color));
        image.put_pixel(x_max_t as u32, y as u32, Rgb(color));
      }
    }

    let scale = PxScale::from(self.font_size);
    let text_width = match &self.font {
      Some(font) => text_size(scale, font, label).0 as i32,
      None => (label.chars().count() as f32 * self.label_char_width) as i32,
    };

    // 标签背景放在边框上方，不超出图像
    let label_x = x_min;
    let label_y = (y_min - self.label_text_height).max(0);
    let label_width = text_width.min(w - label_x);
    let label_height = self.label_text_height.min(h - label_y);

    if label_width > 0 && label_height > 0 {
      let rect = Rect::at(label_x, label_y).of_size(label_width as u32, label_height as u32);
      draw_filled_rect_mut(image, rect, Rgb(color));

      if let Some(font) = &self.font {
        draw_text_mut(
          image,
          Rgb(LABEL_TEXT_COLOR),
          label_x,
          label_y + self.label_text_vertical_padding,
          scale,
          font,
          label,
        );
      }
    }
  }
}

// NaN 视为 0
fn ordered(a: f32, b: f32) -> (f32, f32) {
  let (a, b) = (if a.is_nan() { 0.0 } else { a }, if b.is_nan() { 0.0 } else { b });
  if a <= b { (a, b) } else { (b, a) }
}
