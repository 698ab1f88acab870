//! # 差异边界描绘
//!
//! ## 设计思路
//!
//! 与逐区域描边不同，`BorderTracer` 只描绘差异块的外轮廓：
//! 把两张图缩小到网格尺寸后求出差异点集合，对每个差异点检查上下左右四个邻居，
//! 邻居不在集合中的那条边才需要绘制。相邻差异块之间的内部边因此被省略。
//!
//! ## 实现思路
//!
//! - 点集合为 `BTreeSet<GridPoint>`，成员查询为 `O(log n)`。
//! - 结果绘制在一张与源图同尺寸的全透明画布上，调用方自行决定叠加方式。
//! - 边的坐标按实数缩放因子放大回源图坐标，描边宽度以边为中心展开。

use std::collections::BTreeSet;

use image::imageops::FilterType;
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_line_segment_mut;

use super::differ::ensure_comparable;
use super::grid::resample;
use super::painter::stroke_offsets;
use super::{CompareError, FullScanDiffer, GridPoint};

/// 差异块外轮廓描绘器。
#[derive(Clone)]
pub struct BorderTracer {
    differ: FullScanDiffer,
    color: Rgba<u8>,
    stroke_width: u32,
    x_split: u32,
    y_split: u32,
    filter: FilterType,
}

impl BorderTracer {
    pub fn new(differ: FullScanDiffer, x_split: u32, y_split: u32) -> Result<Self, CompareError> {
        if x_split == 0 || y_split == 0 {
            return Err(CompareError::InvalidConfig(format!(
                "轮廓网格划分必须大于 0：{}x{}",
                x_split, y_split
            )));
        }

        Ok(Self {
            differ,
            color: Rgba([255, 0, 0, 255]),
            stroke_width: 4,
            x_split,
            y_split,
            filter: FilterType::Nearest,
        })
    }

    pub fn with_style(mut self, color: Rgba<u8>, stroke_width: u32) -> Self {
        self.color = color;
        self.stroke_width = stroke_width.max(1);
        self
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    /// 比较两张图并返回只含差异轮廓的透明叠加层。
    pub fn trace(
        &self,
        left: &RgbaImage,
        right: &RgbaImage,
        threshold: u32,
    ) -> Result<RgbaImage, CompareError> {
        let (width, height) = ensure_comparable(left, right)?;
        let x_split = self.x_split.min(width);
        let y_split = self.y_split.min(height);

        let reduced_left = resample(left, x_split, y_split, self.filter);
        let reduced_right = resample(right, x_split, y_split, self.filter);
        let points = self
            .differ
            .difference_points(&reduced_left, &reduced_right, threshold)?;

        let mut overlay = RgbaImage::new(width, height);
        let edges = self.draw_borders(
            &mut overlay,
            &points,
            width as f32 / x_split as f32,
            height as f32 / y_split as f32,
        );

        log::debug!(
            "轮廓描绘完成：网格 {}x{}，差异点 {} 个，绘制边 {} 条",
            x_split,
            y_split,
            points.len(),
            edges
        );

        Ok(overlay)
    }

    /// 在画布上绘制点集合的外轮廓，返回绘制的边数。
    pub fn draw_borders(
        &self,
        canvas: &mut RgbaImage,
        points: &BTreeSet<GridPoint>,
        x_scale: f32,
        y_scale: f32,
    ) -> usize {
        let is_open = |neighbour: Option<GridPoint>| !neighbour.is_some_and(|p| points.contains(&p));
        let mut edges = 0;

        for point in points {
            let x0 = point.x as f32 * x_scale;
            let x1 = (point.x + 1) as f32 * x_scale;
            let y0 = point.y as f32 * y_scale;
            let y1 = (point.y + 1) as f32 * y_scale;

            if is_open(point.above()) {
                self.horizontal_edge(canvas, x0, x1, y0);
                edges += 1;
            }
            if is_open(point.right()) {
                self.vertical_edge(canvas, x1, y0, y1);
                edges += 1;
            }
            if is_open(point.below()) {
                self.horizontal_edge(canvas, x0, x1, y1);
                edges += 1;
            }
            if is_open(point.left()) {
                self.vertical_edge(canvas, x0, y0, y1);
                edges += 1;
            }
        }

        edges
    }

    fn horizontal_edge(&self, canvas: &mut RgbaImage, x0: f32, x1: f32, y: f32) {
        for offset in stroke_offsets(self.stroke_width) {
            let y = y + offset as f32;
            draw_line_segment_mut(canvas, (x0, y), (x1, y), self.color);
        }
    }

    fn vertical_edge(&self, canvas: &mut RgbaImage, x: f32, y0: f32, y1: f32) {
        for offset in stroke_offsets(self.stroke_width) {
            let x = x + offset as f32;
            draw_line_segment_mut(canvas, (x, y0), (x, y1), self.color);
        }
    }
}
