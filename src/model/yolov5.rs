// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model/yolov5.rs - YOLOv5 ONNX 模型
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

use image::{RgbImage, imageops::FilterType};
use tract_onnx::prelude::*;
use tracing::{debug, info};
use url::Url;

use super::{
  BBox, Detection, Detector, ModelError, ModelSettings, labels::coco_label, non_max_suppression,
};
use crate::{FromUrl, FromUrlWithScheme};

const YOLOV5_INPUT_W: u32 = 640;
const YOLOV5_INPUT_H: u32 = 640;
// 每个候选框: cx, cy, w, h, objectness, 各类别分数
const YOLOV5_BOX_OFFSET: usize = 4;
const YOLOV5_CLASS_OFFSET: usize = 5;
const YOLOV5_PAD_VALUE: f32 = 114.0 / 255.0;

type Yolov5Plan = TypedRunnableModel<TypedModel>;

pub struct Yolov5 {
  plan: Yolov5Plan,
  settings: ModelSettings,
}

pub struct Yolov5Builder {
  model_path: PathBuf,
  settings: ModelSettings,
}

impl FromUrlWithScheme for Yolov5Builder {
  const SCHEME: &'static str = "yolov5";
}

impl FromUrl for Yolov5Builder {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Ok(Self::new(url.path()))
  }
}

impl Yolov5Builder {
  pub fn new(model_path: impl Into<PathBuf>) -> Self {
    Self {
      model_path: model_path.into(),
      settings: ModelSettings::default(),
    }
  }

  pub fn settings(mut self, settings: ModelSettings) -> Self {
    self.settings = settings;
    self
  }

  pub fn build(self) -> Result<Yolov5, ModelError> {
    if !self.model_path.is_file() {
      return Err(ModelError::NotFound(self.model_path));
    }

    info!("加载模型文件: {}", self.model_path.display());
    let plan = tract_onnx::onnx()
      .model_for_path(&self.model_path)
      .and_then(|model| {
        model.with_input_fact(
          0,
          InferenceFact::dt_shape(
            f32::datum_type(),
            tvec!(1, 3, YOLOV5_INPUT_H as usize, YOLOV5_INPUT_W as usize),
          ),
        )
      })
      .and_then(|model| model.into_optimized())
      .and_then(|model| model.into_runnable())
      .map_err(|e| ModelError::LoadError(format!("{}: {:#}", self.model_path.display(), e)))?;
    info!(
      "模型加载完成 (置信度阈值 {}, IoU 阈值 {})",
      self.settings.confidence, self.settings.iou
    );

    Ok(Yolov5 {
      plan,
      settings: self.settings,
    })
  }
}

/// 等比缩放到输入尺寸后的比例，图像放在左上角，其余部分填充
fn letterbox_ratio(width: u32, height: u32) -> f32 {
  (YOLOV5_INPUT_W as f32 / width as f32).min(YOLOV5_INPUT_H as f32 / height as f32)
}

impl Yolov5 {
  fn preprocess(&self, image: &RgbImage) -> Result<(Tensor, f32), ModelError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
      return Err(ModelError::InferenceError("空图像".to_string()));
    }

    let ratio = letterbox_ratio(width, height);
    let new_w = ((width as f32 * ratio).round() as u32).clamp(1, YOLOV5_INPUT_W);
    let new_h = ((height as f32 * ratio).round() as u32).clamp(1, YOLOV5_INPUT_H);
    let resized = image::imageops::resize(image, new_w, new_h, FilterType::Triangle);

    let input = tract_ndarray::Array4::from_shape_fn(
      (1, 3, YOLOV5_INPUT_H as usize, YOLOV5_INPUT_W as usize),
      |(_, c, y, x)| {
        if (x as u32) < new_w && (y as u32) < new_h {
          resized.get_pixel(x as u32, y as u32)[c] as f32 / 255.0
        } else {
          YOLOV5_PAD_VALUE
        }
      },
    );

    Ok((input.into_tensor(), ratio))
  }
}

/// 解码 `[1, N, 5+C]` 输出，坐标映射回原图并做 NMS
fn decode_output(
  output: &Tensor,
  settings: &ModelSettings,
  ratio: f32,
  width: u32,
  height: u32,
) -> Result<Vec<Detection>, ModelError> {
  let view = output
    .to_array_view::<f32>()
    .map_err(|e| ModelError::InvalidOutput(format!("{:#}", e)))?;
  let shape = view.shape().to_vec();
  if shape.len() != 3 || shape[0] < 1 || shape[2] <= YOLOV5_CLASS_OFFSET {
    return Err(ModelError::InvalidOutput(format!(
      "期望输出形状 [1, N, 5+C], 实际为 {:?}",
      shape
    )));
  }

  let (num_boxes, stride) = (shape[1], shape[2]);
  let (w, h) = (width as f32, height as f32);
  let mut detections = Vec::new();

  for i in 0..num_boxes {
    let objectness = view[[0, i, YOLOV5_BOX_OFFSET]];
    if objectness < settings.confidence {
      continue;
    }

    let (class_id, class_score) = (YOLOV5_CLASS_OFFSET..stride)
      .map(|j| (j - YOLOV5_CLASS_OFFSET, view[[0, i, j]]))
      .fold((0usize, f32::MIN), |best, x| if x.1 > best.1 { x } else { best });
    let confidence = objectness * class_score;
    if confidence < settings.confidence {
      continue;
    }

    let cx = view[[0, i, 0]] / ratio;
    let cy = view[[0, i, 1]] / ratio;
    let bw = view[[0, i, 2]] / ratio;
    let bh = view[[0, i, 3]] / ratio;

    let class_name = coco_label(class_id)
      .map(String::from)
      .unwrap_or_else(|| format!("class_{}", class_id));

    detections.push(Detection::new(
      class_name,
      confidence.clamp(0.0, 1.0),
      BBox::new(
        (cx - bw / 2.0).clamp(0.0, w),
        (cy - bh / 2.0).clamp(0.0, h),
        (cx + bw / 2.0).clamp(0.0, w),
        (cy + bh / 2.0).clamp(0.0, h),
      ),
    ));
  }

  debug!("阈值过滤后候选框数量: {}", detections.len());
  non_max_suppression(&mut detections, settings.iou);
  debug!("检测到 {} 个物体", detections.len());

  Ok(detections)
}

impl Detector for Yolov5 {
  type Error = ModelError;

  fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    let (input, ratio) = self.preprocess(image)?;

    debug!("执行模型推理");
    let outputs = self
      .plan
      .run(tvec!(input.into()))
      .map_err(|e| ModelError::InferenceError(format!("{:#}", e)))?;
    let output = outputs
      .first()
      .ok_or_else(|| ModelError::InvalidOutput("模型没有输出".to_string()))?;

    decode_output(output, &self.settings, ratio, image.width(), image.height())
  }
}
