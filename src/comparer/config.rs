//! # 配置模块
//!
//! ## 设计思路
//!
//! 把比对链路中所有可调策略集中到 `CompareConfig`：像素度量、网格层级、重采样滤波器、
//! 描边样式、默认阈值与解码限制。运行时通过 `build_*` 方法把配置装配成具体组件。
//!
//! 档位（precise / balanced / fast）作为高层语义，映射到网格层级组合：
//! - `Precise`：不缩放，逐像素比较
//! - `Balanced`：单层 32x32 网格
//! - `Fast`：64x64 → 16x16 两级金字塔
//!
//! ## 实现思路
//!
//! - `Default` 即启动时的默认装配：32x32 网格包裹逐像素通道距离检测。
//! - `CompareSettings` 是可序列化的外部视图，写回前逐项校验范围。
//! - `infer_profile` 从当前网格层级反推档位，供外部展示。

use std::sync::Arc;

use image::Rgba;
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::codec::DecodeLimits;

use super::{
    BorderTracer, ChannelDistanceMetric, CompareError, Differ, DifferencePainter, FullScanDiffer,
    GridDiffer, PerceptualMetric, PixelMetric,
};

const MAX_STROKE_WIDTH: u32 = 32;
const MAX_SPLIT: u32 = 4096;
const MAX_THRESHOLD: u32 = 1024;
const MAX_GRID_LEVELS: usize = 4;

/// 像素度量策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricKind {
    ChannelDistance,
    Perceptual,
}

impl MetricKind {
    pub(crate) fn from_str(kind: &str) -> Result<Self, CompareError> {
        match kind.trim().to_lowercase().as_str() {
            "channel" => Ok(Self::ChannelDistance),
            "perceptual" => Ok(Self::Perceptual),
            other => Err(CompareError::InvalidConfig(format!(
                "未知像素度量：{}（可选：channel / perceptual）",
                other
            ))),
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::ChannelDistance => "channel",
            Self::Perceptual => "perceptual",
        }
    }

    fn build(self) -> Arc<dyn PixelMetric> {
        match self {
            Self::ChannelDistance => Arc::new(ChannelDistanceMetric),
            Self::Perceptual => Arc::new(PerceptualMetric),
        }
    }
}

/// 比对配置。
#[derive(Debug, Clone)]
pub struct CompareConfig {
    pub metric: MetricKind,
    /// 网格层级，由外到内。为空时直接逐像素比较。
    pub grid_levels: Vec<(u32, u32)>,
    /// 网格缩小时使用的滤波器。
    pub resample_filter: FilterType,
    pub highlight_color: Rgba<u8>,
    pub stroke_width: u32,
    pub outline_stroke_width: u32,
    pub outline_split: (u32, u32),
    /// 请求未指定阈值时使用。
    pub default_threshold: u32,
    /// 单张上传图片的最大字节数。
    pub max_upload_bytes: u64,
    /// 解码后的像素上限（`width * height`）。
    pub max_decoded_pixels: u64,
    /// 解码阶段允许的预计内存上限（按 RGBA 估算，字节）。
    pub max_decoded_bytes: u64,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            metric: MetricKind::ChannelDistance,
            grid_levels: vec![(32, 32)],
            resample_filter: FilterType::Nearest,
            highlight_color: Rgba([255, 0, 0, 255]),
            stroke_width: 1,
            outline_stroke_width: 4,
            outline_split: (32, 32),
            default_threshold: 20,
            max_upload_bytes: 50 * 1024 * 1024,
            max_decoded_pixels: 40_000_000,
            max_decoded_bytes: 160 * 1024 * 1024,
        }
    }
}

/// 比对档位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareProfile {
    Precise,
    Balanced,
    Fast,
}

impl CompareProfile {
    /// 从外部字符串解析档位。
    ///
    /// # 示例
    /// ```rust,ignore
    /// let p = CompareProfile::from_str("fast")?;
    /// assert_eq!(p.as_str(), "fast");
    /// ```
    pub(crate) fn from_str(profile: &str) -> Result<Self, CompareError> {
        match profile.trim().to_lowercase().as_str() {
            "precise" => Ok(Self::Precise),
            "balanced" => Ok(Self::Balanced),
            "fast" => Ok(Self::Fast),
            other => Err(CompareError::InvalidFormat(format!(
                "未知比对档位：{}（可选：precise / balanced / fast）",
                other
            ))),
        }
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::Precise => "precise",
            Self::Balanced => "balanced",
            Self::Fast => "fast",
        }
    }
}

impl CompareConfig {
    /// 基于当前网格层级反推档位。
    pub(crate) fn infer_profile(&self) -> CompareProfile {
        match self.grid_levels.as_slice() {
            [] => CompareProfile::Precise,
            [(x, y)] if *x <= 16 && *y <= 16 => CompareProfile::Fast,
            [_] => CompareProfile::Balanced,
            _ => CompareProfile::Fast,
        }
    }

    pub(crate) fn apply_profile(&mut self, profile: CompareProfile) {
        match profile {
            CompareProfile::Precise => {
                self.grid_levels.clear();
            }
            CompareProfile::Balanced => {
                self.grid_levels = vec![(32, 32)];
                self.resample_filter = FilterType::Nearest;
            }
            CompareProfile::Fast => {
                self.grid_levels = vec![(64, 64), (16, 16)];
                self.resample_filter = FilterType::Nearest;
            }
        }
    }

    pub fn validate(&self) -> Result<(), CompareError> {
        if self.grid_levels.len() > MAX_GRID_LEVELS {
            return Err(CompareError::InvalidConfig(format!(
                "网格层级过多：{}（上限 {}）",
                self.grid_levels.len(),
                MAX_GRID_LEVELS
            )));
        }

        for &(x, y) in self.grid_levels.iter().chain(std::iter::once(&self.outline_split)) {
            if !(1..=MAX_SPLIT).contains(&x) || !(1..=MAX_SPLIT).contains(&y) {
                return Err(CompareError::InvalidConfig(format!(
                    "网格划分 {}x{} 超出范围（1..={}）",
                    x, y, MAX_SPLIT
                )));
            }
        }

        for width in [self.stroke_width, self.outline_stroke_width] {
            if !(1..=MAX_STROKE_WIDTH).contains(&width) {
                return Err(CompareError::InvalidConfig(format!(
                    "描边宽度 {} 超出范围（1..={}）",
                    width, MAX_STROKE_WIDTH
                )));
            }
        }

        if self.default_threshold > MAX_THRESHOLD {
            return Err(CompareError::InvalidConfig(format!(
                "默认阈值 {} 超出范围（0..={}）",
                self.default_threshold, MAX_THRESHOLD
            )));
        }

        if self.max_upload_bytes == 0 || self.max_decoded_pixels == 0 || self.max_decoded_bytes == 0 {
            return Err(CompareError::InvalidConfig("解码限制必须大于 0".to_string()));
        }

        Ok(())
    }

    /// 按网格层级由内向外组装检测器。
    pub fn build_differ(&self) -> Result<Arc<dyn Differ>, CompareError> {
        self.validate()?;

        let mut differ: Arc<dyn Differ> =
            Arc::new(FullScanDiffer::with_shared_metric(self.metric.build()));
        for &(x_split, y_split) in self.grid_levels.iter().rev() {
            differ = Arc::new(GridDiffer::new(differ, x_split, y_split)?.with_filter(self.resample_filter));
        }

        Ok(differ)
    }

    pub fn build_painter(&self) -> DifferencePainter {
        DifferencePainter::new(self.highlight_color, self.stroke_width)
    }

    pub fn build_tracer(&self) -> Result<BorderTracer, CompareError> {
        let (x_split, y_split) = self.outline_split;
        Ok(BorderTracer::new(
            FullScanDiffer::with_shared_metric(self.metric.build()),
            x_split,
            y_split,
        )?
        .with_style(self.highlight_color, self.outline_stroke_width)
        .with_filter(self.resample_filter))
    }

    pub fn decode_limits(&self) -> DecodeLimits {
        DecodeLimits {
            max_upload_bytes: self.max_upload_bytes,
            max_decoded_pixels: self.max_decoded_pixels,
            max_decoded_bytes: self.max_decoded_bytes,
        }
    }

    pub fn settings(&self) -> CompareSettings {
        CompareSettings {
            metric: self.metric.as_str().to_string(),
            grid_levels: self.grid_levels.iter().map(|&(x, y)| [x, y]).collect(),
            highlight_color: self.highlight_color.0,
            stroke_width: self.stroke_width,
            outline_stroke_width: self.outline_stroke_width,
            default_threshold: self.default_threshold,
        }
    }

    /// 校验并写回外部设置；校验失败时配置保持不变。
    pub fn apply_settings(&mut self, settings: &CompareSettings) -> Result<(), CompareError> {
        let mut next = self.clone();
        next.metric = MetricKind::from_str(&settings.metric)?;
        next.grid_levels = settings.grid_levels.iter().map(|&[x, y]| (x, y)).collect();
        next.highlight_color = Rgba(settings.highlight_color);
        next.stroke_width = settings.stroke_width;
        next.outline_stroke_width = settings.outline_stroke_width;
        next.default_threshold = settings.default_threshold;
        next.validate()?;

        *self = next;
        Ok(())
    }
}

/// 可序列化的比对设置视图。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompareSettings {
    pub metric: String,
    pub grid_levels: Vec<[u32; 2]>,
    pub highlight_color: [u8; 4],
    pub stroke_width: u32,
    pub outline_stroke_width: u32,
    pub default_threshold: u32,
}
