//! # 网格差异检测
//!
//! ## 设计思路
//!
//! `GridDiffer` 先把两张图重采样到 `x_split × y_split` 的网格尺寸，交给内部检测器比较，
//! 再把内部区域按 `源宽 / 网格宽`、`源高 / 网格高` 放大回源图坐标。
//! 内部检测器也可以是另一个 `GridDiffer`，形成金字塔式的多级缩放。
//!
//! ## 实现思路
//!
//! - 网格尺寸大于源图时按源图尺寸截断（缩放因子不小于 1）。
//! - 缩放因子为实数，100 宽 16 格得到 6.25，而不是整除的 6。
//! - 重采样优先使用 `fast_image_resize`，失败时回退 `image::imageops::resize`。
//!   默认滤波器 `Nearest` 在 `fast_image_resize` 中对应 Box（面积平均），缩小时保留局部差异。
//! - 重采样按通道独立进行，不做 alpha 预乘：全透明像素的 RGB 差异在网格层同样可见，
//!   与网格被截断（直接复制源图）时的结果一致。
//! - 异步路径只在返回前校验尺寸，重采样推迟到流首次被轮询时执行，
//!   后台提交因此不承担缩放开销。

use std::sync::Arc;

use fast_image_resize as fr;
use futures_util::stream;
use futures_util::{StreamExt, TryStreamExt};
use image::RgbaImage;
use image::imageops::FilterType;

use super::differ::ensure_comparable;
use super::{CompareError, Differ, RegionStream, Regions, SharedRaster};

/// 按网格缩小后再比较的差异检测器。
#[derive(Clone)]
pub struct GridDiffer {
    inner: Arc<dyn Differ>,
    x_split: u32,
    y_split: u32,
    filter: FilterType,
}

/// 某次比较实际使用的网格尺寸与缩放因子。
#[derive(Debug, Clone, Copy, PartialEq)]
struct GridPlan {
    x_split: u32,
    y_split: u32,
    x_scale: f32,
    y_scale: f32,
}

impl GridDiffer {
    pub fn new(inner: Arc<dyn Differ>, x_split: u32, y_split: u32) -> Result<Self, CompareError> {
        if x_split == 0 || y_split == 0 {
            return Err(CompareError::InvalidConfig(format!(
                "网格划分必须大于 0：{}x{}",
                x_split, y_split
            )));
        }

        Ok(Self {
            inner,
            x_split,
            y_split,
            filter: FilterType::Nearest,
        })
    }

    pub fn with_filter(mut self, filter: FilterType) -> Self {
        self.filter = filter;
        self
    }

    pub fn x_split(&self) -> u32 {
        self.x_split
    }

    pub fn y_split(&self) -> u32 {
        self.y_split
    }

    pub fn filter(&self) -> FilterType {
        self.filter
    }

    fn plan(&self, width: u32, height: u32) -> GridPlan {
        let x_split = self.x_split.min(width);
        let y_split = self.y_split.min(height);

        GridPlan {
            x_split,
            y_split,
            x_scale: width as f32 / x_split as f32,
            y_scale: height as f32 / y_split as f32,
        }
    }

    fn reduce_pair(
        &self,
        left: &RgbaImage,
        right: &RgbaImage,
    ) -> Result<(RgbaImage, RgbaImage, GridPlan), CompareError> {
        let (width, height) = ensure_comparable(left, right)?;
        let plan = self.plan(width, height);

        let reduced_left = resample(left, plan.x_split, plan.y_split, self.filter);
        let reduced_right = resample(right, plan.x_split, plan.y_split, self.filter);

        Ok((reduced_left, reduced_right, plan))
    }
}

impl Differ for GridDiffer {
    fn differences<'a>(
        &'a self,
        left: &'a RgbaImage,
        right: &'a RgbaImage,
        threshold: u32,
    ) -> Result<Regions<'a>, CompareError> {
        let (reduced_left, reduced_right, plan) = self.reduce_pair(left, right)?;

        // 缩小后的图只在本次调用内存活，需要在返回前把内部结果收集出来
        let regions: Vec<_> = self
            .inner
            .differences(&reduced_left, &reduced_right, threshold)?
            .map(|region| region.scaled(plan.x_scale, plan.y_scale))
            .collect();

        log::debug!(
            "网格 {}x{} 比较完成，差异 {} 处（缩放 {:.3}x{:.3}）",
            plan.x_split,
            plan.y_split,
            regions.len(),
            plan.x_scale,
            plan.y_scale
        );

        Ok(Box::new(regions.into_iter()))
    }

    fn differences_shared(
        &self,
        left: &SharedRaster,
        right: &SharedRaster,
        threshold: u32,
    ) -> Result<RegionStream, CompareError> {
        SharedRaster::read_pair(left, right, ensure_comparable)?;

        let grid = self.clone();
        let (left, right) = (left.clone(), right.clone());

        let reduced = async move {
            let (reduced_left, reduced_right, plan) =
                SharedRaster::read_pair(&left, &right, |l, r| grid.reduce_pair(l, r))?;

            log::debug!(
                "网格 {}x{} 重采样完成（缩放 {:.3}x{:.3}）",
                plan.x_split,
                plan.y_split,
                plan.x_scale,
                plan.y_scale
            );

            let inner = grid.inner.differences_shared(
                &SharedRaster::new(reduced_left),
                &SharedRaster::new(reduced_right),
                threshold,
            )?;

            Ok::<_, CompareError>(
                inner
                    .map(move |item| item.map(|region| region.scaled(plan.x_scale, plan.y_scale)))
                    .boxed(),
            )
        };

        Ok(stream::once(reduced).try_flatten().boxed())
    }
}

/// 把图片重采样到指定尺寸；尺寸相同时直接复制。
pub(crate) fn resample(image: &RgbaImage, width: u32, height: u32, filter: FilterType) -> RgbaImage {
    if image.dimensions() == (width, height) {
        return image.clone();
    }

    match resize_with_fast_image_resize(image, width, height, filter) {
        Ok(resized) => resized,
        Err(err) => {
            log::warn!(
                "⚠️ fast_image_resize 重采样失败，回退 image::imageops::resize：{}",
                err
            );
            image::imageops::resize(image, width, height, filter)
        }
    }
}

fn resize_with_fast_image_resize(
    image: &RgbaImage,
    target_width: u32,
    target_height: u32,
    filter: FilterType,
) -> Result<RgbaImage, CompareError> {
    let (src_width, src_height) = image.dimensions();

    let src_image = fr::images::Image::from_vec_u8(
        src_width,
        src_height,
        image.as_raw().clone(),
        fr::PixelType::U8x4,
    )
    .map_err(|e| CompareError::Runtime(format!("构建源图像缓冲失败：{}", e)))?;

    let mut dst_image = fr::images::Image::new(target_width, target_height, fr::PixelType::U8x4);

    let mut resizer = fr::Resizer::new();
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(to_fast_filter(filter)))
        .use_alpha(false);

    resizer
        .resize(&src_image, &mut dst_image, Some(&options))
        .map_err(|e| CompareError::Runtime(format!("fast_image_resize 执行失败：{}", e)))?;

    RgbaImage::from_raw(target_width, target_height, dst_image.into_vec())
        .ok_or_else(|| CompareError::Runtime("fast_image_resize 输出缓冲长度异常".to_string()))
}

fn to_fast_filter(filter: FilterType) -> fr::FilterType {
    match filter {
        FilterType::Nearest => fr::FilterType::Box,
        FilterType::Triangle => fr::FilterType::Bilinear,
        FilterType::CatmullRom => fr::FilterType::CatmullRom,
        FilterType::Gaussian => fr::FilterType::Mitchell,
        FilterType::Lanczos3 => fr::FilterType::Lanczos3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparer::{ChannelDistanceMetric, FullScanDiffer, Region};
    use image::Rgba;
    use std::sync::Mutex;

    const GRAY: Rgba<u8> = Rgba([100, 100, 100, 255]);
    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    /// 记录收到的输入尺寸，并按预设返回“每个网格点都有差异”或“无差异”。
    struct RecordingDiffer {
        every_cell: bool,
        seen: Mutex<Vec<(u32, u32)>>,
    }

    impl RecordingDiffer {
        fn new(every_cell: bool) -> Arc<Self> {
            Arc::new(Self {
                every_cell,
                seen: Mutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<(u32, u32)> {
            self.seen.lock().expect("seen lock").clone()
        }

        fn regions_for(&self, width: u32, height: u32) -> Vec<Region> {
            self.seen.lock().expect("seen lock").push((width, height));
            if !self.every_cell {
                return Vec::new();
            }
            (0..width)
                .flat_map(|x| (0..height).map(move |y| Region::cell(x, y)))
                .collect()
        }
    }

    impl Differ for RecordingDiffer {
        fn differences<'a>(
            &'a self,
            left: &'a RgbaImage,
            _right: &'a RgbaImage,
            _threshold: u32,
        ) -> Result<Regions<'a>, CompareError> {
            let (width, height) = left.dimensions();
            Ok(Box::new(self.regions_for(width, height).into_iter()))
        }

        fn differences_shared(
            &self,
            left: &SharedRaster,
            _right: &SharedRaster,
            _threshold: u32,
        ) -> Result<RegionStream, CompareError> {
            let (width, height) = left.dimensions();
            let regions = self.regions_for(width, height);
            Ok(stream::iter(regions.into_iter().map(Ok)).boxed())
        }
    }

    fn solid(width: u32, height: u32, color: Rgba<u8>) -> RgbaImage {
        RgbaImage::from_pixel(width, height, color)
    }

    fn assert_full_grid(regions: &[Region], split: u32, size: f32) {
        assert_eq!(regions.len(), (split * split) as usize);
        let step = size / split as f32;
        for x in 0..split {
            for y in 0..split {
                let expected = Region::new(x as f32 * step, y as f32 * step, step, step);
                assert!(
                    regions.iter().any(|r| r.approx_eq(&expected, 1e-3)),
                    "missing region {:?}",
                    expected
                );
            }
        }
    }

    #[test]
    fn zero_split_is_rejected() {
        let inner = RecordingDiffer::new(false);

        assert!(matches!(
            GridDiffer::new(inner.clone(), 0, 4),
            Err(CompareError::InvalidConfig(_))
        ));
        assert!(matches!(
            GridDiffer::new(inner, 4, 0),
            Err(CompareError::InvalidConfig(_))
        ));
    }

    #[test]
    fn inner_receives_reduced_images() {
        let inner = RecordingDiffer::new(false);
        let grid = GridDiffer::new(inner.clone(), 16, 8).expect("grid");
        let image = solid(100, 50, GRAY);

        let count = grid.differences(&image, &image, 0).expect("diff").count();

        assert_eq!(count, 0);
        assert_eq!(inner.seen(), vec![(16, 8)]);
    }

    #[test]
    fn regions_are_scaled_by_real_factor() {
        let inner = RecordingDiffer::new(true);
        let grid = GridDiffer::new(inner, 16, 16).expect("grid");
        let image = solid(100, 100, GRAY);

        let regions: Vec<_> = grid.differences(&image, &image, 0).expect("diff").collect();

        assert_full_grid(&regions, 16, 100.0);
    }

    #[test]
    fn split_larger_than_source_is_clamped() {
        let inner = RecordingDiffer::new(true);
        let grid = GridDiffer::new(inner.clone(), 16, 16).expect("grid");
        let image = solid(4, 4, GRAY);

        let regions: Vec<_> = grid.differences(&image, &image, 0).expect("diff").collect();

        assert_eq!(inner.seen(), vec![(4, 4)]);
        assert_full_grid(&regions, 4, 4.0);
    }

    #[test]
    fn size_mismatch_is_reported_without_calling_inner() {
        let inner = RecordingDiffer::new(true);
        let grid = GridDiffer::new(inner.clone(), 4, 4).expect("grid");

        let (left, right) = (solid(10, 10, GRAY), solid(10, 11, GRAY));
        let result = grid.differences(&left, &right, 0);

        assert!(matches!(result, Err(CompareError::SizeMismatch { .. })));
        assert!(inner.seen().is_empty());
    }

    #[test]
    fn nested_grids_compose_scales() {
        let full_scan: Arc<dyn Differ> = Arc::new(FullScanDiffer::new(ChannelDistanceMetric));
        let inner: Arc<dyn Differ> = Arc::new(GridDiffer::new(full_scan, 16, 16).expect("inner"));
        let outer = GridDiffer::new(inner, 64, 64).expect("outer");

        let left = solid(128, 128, GRAY);
        let mut right = left.clone();
        for x in 0..64 {
            for y in 0..64 {
                right.put_pixel(x, y, WHITE);
            }
        }

        let regions: Vec<_> = outer.differences(&left, &right, 10).expect("diff").collect();

        assert_eq!(regions.len(), 64);
        for region in &regions {
            assert!((region.width - 8.0).abs() < 1e-3);
            assert!((region.height - 8.0).abs() < 1e-3);
            assert!(region.right() <= 64.0 + 1e-3);
            assert!(region.bottom() <= 64.0 + 1e-3);
        }
    }

    #[test]
    fn resample_keeps_same_size_untouched() {
        let mut image = solid(3, 3, GRAY);
        image.put_pixel(1, 1, WHITE);

        let resampled = resample(&image, 3, 3, FilterType::Nearest);

        assert_eq!(resampled, image);
    }

    #[tokio::test]
    async fn shared_regions_are_scaled() {
        let inner = RecordingDiffer::new(true);
        let grid = GridDiffer::new(inner.clone(), 16, 16).expect("grid");
        let image = SharedRaster::new(solid(100, 100, GRAY));

        let stream = grid.differences_shared(&image, &image, 0).expect("diff");
        let regions: Result<Vec<_>, _> = stream.collect::<Vec<_>>().await.into_iter().collect();
        let regions = regions.expect("regions");

        assert_eq!(inner.seen(), vec![(16, 16)]);
        assert_full_grid(&regions, 16, 100.0);
    }

    #[tokio::test]
    async fn shared_size_mismatch_is_eager() {
        let grid = GridDiffer::new(RecordingDiffer::new(true), 4, 4).expect("grid");

        let result = grid.differences_shared(
            &SharedRaster::new(solid(8, 8, GRAY)),
            &SharedRaster::new(solid(8, 9, GRAY)),
            0,
        );

        assert!(matches!(result, Err(CompareError::SizeMismatch { .. })));
    }

    #[tokio::test]
    async fn shared_resample_waits_for_first_poll() {
        let inner = RecordingDiffer::new(true);
        let grid = GridDiffer::new(inner.clone(), 8, 8).expect("grid");
        let image = SharedRaster::new(solid(64, 64, GRAY));

        let mut stream = grid.differences_shared(&image, &image, 0).expect("diff");
        assert!(inner.seen().is_empty());

        let first = stream.next().await.expect("first region").expect("region");

        assert_eq!(inner.seen(), vec![(8, 8)]);
        assert!(first.approx_eq(&Region::new(0.0, 0.0, 8.0, 8.0), 1e-3));
    }

    #[tokio::test]
    async fn shared_resize_before_first_poll_is_reported_in_stream() {
        let grid = GridDiffer::new(RecordingDiffer::new(true), 4, 4).expect("grid");
        let left = SharedRaster::new(solid(16, 16, GRAY));
        let right = SharedRaster::new(solid(16, 16, GRAY));

        let stream = grid.differences_shared(&left, &right, 0).expect("diff");
        right.write(|img| *img = solid(16, 20, GRAY));
        let items: Vec<_> = stream.collect().await;

        assert_eq!(items.len(), 1);
        assert!(matches!(items[0], Err(CompareError::SizeMismatch { .. })));
    }

    #[test]
    fn transparent_colour_differences_survive_resampling() {
        let full_scan: Arc<dyn Differ> = Arc::new(FullScanDiffer::new(ChannelDistanceMetric));
        let grid = GridDiffer::new(full_scan, 32, 32).expect("grid");
        let left = solid(64, 64, Rgba([0, 0, 0, 0]));
        let right = solid(64, 64, Rgba([255, 255, 255, 0]));

        let count = grid.differences(&left, &right, 0).expect("diff").count();

        assert_eq!(count, 32 * 32);
    }
}
