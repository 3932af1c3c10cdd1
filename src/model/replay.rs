// 该文件是 Jingjie （警戒哨） 项目的一部分。
// src/model/replay.rs - 回放检测记录
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

use std::{collections::VecDeque, path::Path};

use image::RgbImage;
use tracing::{debug, info};
use url::Url;

use super::{Detection, Detector, ModelError};
use crate::{FromUrl, FromUrlWithScheme};

/// 回放预先录制的检测结果
///
/// 记录文件是一个 JSON 数组，第 k 个元素是第 k 次调用 `detect` 的结果：
///
/// ```json
/// [
///   [],
///   [{"class_name": "person", "confidence": 0.9,
///     "bbox": {"xmin": 1.0, "ymin": 2.0, "xmax": 30.0, "ymax": 40.0}}]
/// ]
/// ```
///
/// 记录用完后返回空集合。
pub struct ReplayDetector {
  script: VecDeque<Vec<Detection>>,
}

impl FromUrlWithScheme for ReplayDetector {
  const SCHEME: &'static str = "replay";
}

impl FromUrl for ReplayDetector {
  type Error = ModelError;

  fn from_url(url: &Url) -> Result<Self, Self::Error> {
    if url.scheme() != Self::SCHEME {
      return Err(ModelError::ModelPathError(format!(
        "模型路径必须使用 {} 方案",
        Self::SCHEME
      )));
    }
    Self::open(Path::new(url.path()))
  }
}

impl ReplayDetector {
  pub fn new(script: Vec<Vec<Detection>>) -> Self {
    Self {
      script: script.into(),
    }
  }

  pub fn open(path: &Path) -> Result<Self, ModelError> {
    if !path.is_file() {
      return Err(ModelError::NotFound(path.to_path_buf()));
    }
    let content = std::fs::read_to_string(path)?;
    let script: Vec<Vec<Detection>> = serde_json::from_str(&content)
      .map_err(|e| ModelError::ReplayError(format!("{}: {}", path.display(), e)))?;
    info!("加载检测记录: {} ({} 帧)", path.display(), script.len());
    Ok(Self::new(script))
  }
}

impl Detector for ReplayDetector {
  type Error = ModelError;

  fn detect(&mut self, _image: &RgbImage) -> Result<Vec<Detection>, Self::Error> {
    let detections = self.script.pop_front().unwrap_or_default();
    debug!("回放 {} 个检测结果", detections.len());
    Ok(detections)
  }
}
