// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model.rs - 目标检测模型
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

use std::path::PathBuf;

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::{FromUrl, FromUrlWithScheme};

pub mod labels;

mod nms;
pub use self::nms::non_max_suppression;

mod replay;
pub use self::replay::ReplayDetector;

#[cfg(feature = "model_yolov5")]
mod yolov5;
#[cfg(feature = "model_yolov5")]
pub use self::yolov5::{Yolov5, Yolov5Builder};

/// 目标检测器
///
/// 给定一帧图像，返回检测到的目标集合。置信度与 IoU 阈值在构造时确定。
pub trait Detector {
  type Error;

  fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error>;
}

impl<D: Detector + ?Sized> Detector for Box<D> {
  type Error = D::Error;

  fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    (**self).detect(image)
  }
}

/// 像素坐标下的边框 [x_min, y_min, x_max, y_max]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
  pub xmin: f32,
  pub ymin: f32,
  pub xmax: f32,
  pub ymax: f32,
}

impl BBox {
  pub fn new(xmin: f32, ymin: f32, xmax: f32, ymax: f32) -> Self {
    Self {
      xmin,
      ymin,
      xmax,
      ymax,
    }
  }

  pub fn area(&self) -> f32 {
    (self.xmax - self.xmin).max(0.0) * (self.ymax - self.ymin).max(0.0)
  }

  pub fn intersection_area(&self, other: &BBox) -> f32 {
    let l = self.xmin.max(other.xmin);
    let r = self.xmax.min(other.xmax);
    let t = self.ymin.max(other.ymin);
    let b = self.ymax.min(other.ymax);
    (r - l).max(0.0) * (b - t).max(0.0)
  }

  pub fn iou(&self, other: &BBox) -> f32 {
    let union = self.area() + other.area() - self.intersection_area(other);
    if union <= 0.0 {
      0.0
    } else {
      self.intersection_area(other) / union
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
  pub class_name: String,
  pub confidence: f32,
  pub bbox: BBox,
}

impl Detection {
  pub fn new(class_name: impl Into<String>, confidence: f32, bbox: BBox) -> Self {
    Self {
      class_name: class_name.into(),
      confidence,
      bbox,
    }
  }
}

/// 检测器使用的阈值，随告警一起上报
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelSettings {
  pub confidence: f32,
  pub iou: f32,
}

impl Default for ModelSettings {
  fn default() -> Self {
    Self {
      confidence: 0.4,
      iou: 0.45,
    }
  }
}

/// 计算设备
///
/// 当前后端只在 CPU 上推理，其余设备会回退到 CPU。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Device {
  Cpu,
}

impl Device {
  pub fn select(requested: &str) -> Self {
    if !requested.eq_ignore_ascii_case("cpu") {
      warn!("请求的计算设备 '{}' 不可用，回退到 CPU", requested);
    }
    Device::Cpu
  }
}

#[derive(Error, Debug)]
pub enum ModelError {
  #[error("模型文件不存在: {0}")]
  NotFound(PathBuf),
  #[error("模型加载错误: {0}")]
  LoadError(String),
  #[error("推理错误: {0}")]
  InferenceError(String),
  #[error("模型输出无效: {0}")]
  InvalidOutput(String),
  #[error("检测记录错误: {0}")]
  ReplayError(String),
  #[error("模型路径错误: {0}")]
  ModelPathError(String),
  #[error("I/O 错误: {0}")]
  IoError(#[from] std::io::Error),
}

pub enum DetectorWrapper {
  #[cfg(feature = "model_yolov5")]
  Yolov5(Yolov5),
  Replay(ReplayDetector),
}

impl DetectorWrapper {
  /// 按模型描述构造检测器
  ///
  /// 支持 `yolov5:///path/model.onnx`、`replay:///path/detections.json`，
  /// 无法解析为已知方案的描述按 YOLOv5 ONNX 文件路径处理。
  pub fn from_descriptor(descriptor: &str, settings: ModelSettings) -> Result<Self, ModelError> {
    if let Ok(url) = Url::parse(descriptor) {
      if url.scheme() == ReplayDetector::SCHEME {
        return Ok(DetectorWrapper::Replay(ReplayDetector::from_url(&url)?));
      }
      #[cfg(feature = "model_yolov5")]
      {
        if url.scheme() == Yolov5Builder::SCHEME {
          let model = Yolov5Builder::from_url(&url)?.settings(settings).build()?;
          return Ok(DetectorWrapper::Yolov5(model));
        }
      }
    }

    #[cfg(feature = "model_yolov5")]
    {
      let model = Yolov5Builder::new(descriptor).settings(settings).build()?;
      Ok(DetectorWrapper::Yolov5(model))
    }
    #[cfg(not(feature = "model_yolov5"))]
    {
      let _ = settings;
      Err(ModelError::ModelPathError(format!(
        "无法识别模型 '{}'，未启用 model_yolov5 特性",
        descriptor
      )))
    }
  }
}

impl Detector for DetectorWrapper {
  type Error = ModelError;

  fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    match self {
      #[cfg(feature = "model_yolov5")]
      DetectorWrapper::Yolov5(model) => model.detect(image),
      DetectorWrapper::Replay(model) => model.detect(image),
    }
  }
}
