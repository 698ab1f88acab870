//! # 差异检测模块
//!
//! ## 设计思路
//!
//! `Differ` 是差异检测的能力接口，逐像素检测器与网格检测器都实现它，
//! 网格检测器再通过组合持有一个 `Arc<dyn Differ>`，从而可以任意嵌套。
//!
//! 每个检测器提供两条路径：
//! - `differences`：同步路径，返回迭代器，可重复调用，不修改内部状态。
//!   逐像素检测器的迭代器是惰性的；网格检测器的缩小图只在调用内存活，会先收集内部结果再返回。
//! - `differences_shared`：异步增量路径，输入为 `SharedRaster`，返回逐个产出区域的流。
//!
//! ## 实现思路
//!
//! - 前置校验（尺寸一致、非零面积）在两条路径上都**立即**执行，而不是延迟到首次迭代。
//! - 异步路径每一步最多持锁扫描一列，找到差异或列结束即释放锁并 `yield_now`，
//!   长时间扫描不会长期独占栅格锁。
//! - 扫描途中若输入尺寸被改变，流产出一个 `SizeMismatch` 错误后结束。

use std::collections::BTreeSet;
use std::sync::Arc;

use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use image::{Rgba, RgbaImage};

use super::{CompareError, GridPoint, PixelMetric, Region, SharedRaster};

/// 同步路径产出的惰性区域序列。
pub type Regions<'a> = Box<dyn Iterator<Item = Region> + Send + 'a>;

/// 异步路径产出的区域流。
pub type RegionStream = BoxStream<'static, Result<Region, CompareError>>;

/// 差异检测能力接口。
pub trait Differ: Send + Sync {
    /// 同步计算差异区域。
    ///
    /// 逐像素实现按需产出区域；网格实现返回前已收集完内部结果。
    fn differences<'a>(
        &'a self,
        left: &'a RgbaImage,
        right: &'a RgbaImage,
        threshold: u32,
    ) -> Result<Regions<'a>, CompareError>;

    /// 在共享栅格上增量计算差异区域。
    ///
    /// 返回前已完成尺寸校验；重采样、扫描等耗时工作都在流被轮询时进行，
    /// 流中的每一次栅格访问都在对应锁内进行。
    fn differences_shared(
        &self,
        left: &SharedRaster,
        right: &SharedRaster,
        threshold: u32,
    ) -> Result<RegionStream, CompareError>;
}

/// 校验两张图可比：尺寸一致且非零面积。
pub(crate) fn ensure_comparable(
    left: &RgbaImage,
    right: &RgbaImage,
) -> Result<(u32, u32), CompareError> {
    let left_size = left.dimensions();
    let right_size = right.dimensions();

    if left_size != right_size || left_size.0 == 0 || left_size.1 == 0 {
        return Err(CompareError::size_mismatch(left_size, right_size));
    }

    Ok(left_size)
}

/// 逐像素差异检测器。
#[derive(Clone)]
pub struct FullScanDiffer {
    metric: Arc<dyn PixelMetric>,
}

impl FullScanDiffer {
    pub fn new<M: PixelMetric + 'static>(metric: M) -> Self {
        Self {
            metric: Arc::new(metric),
        }
    }

    pub fn with_shared_metric(metric: Arc<dyn PixelMetric>) -> Self {
        Self { metric }
    }

    pub fn metric(&self) -> &dyn PixelMetric {
        self.metric.as_ref()
    }

    /// 按 “先 x 后 y” 的顺序惰性枚举差异坐标。调用方需先完成尺寸校验。
    fn differing_cells<'a>(
        &'a self,
        left: &'a RgbaImage,
        right: &'a RgbaImage,
        threshold: u32,
    ) -> impl Iterator<Item = GridPoint> + Send + 'a {
        let (width, height) = left.dimensions();
        let metric = self.metric.as_ref();

        (0..width)
            .flat_map(move |x| (0..height).map(move |y| GridPoint::new(x, y)))
            .filter(move |point| {
                !metric.pixel_equals_within(
                    *left.get_pixel(point.x, point.y),
                    *right.get_pixel(point.x, point.y),
                    threshold,
                )
            })
    }

    /// 差异点集合，按 `(x, y)` 字典序排列，用于邻接成员查询。
    pub fn difference_points(
        &self,
        left: &RgbaImage,
        right: &RgbaImage,
        threshold: u32,
    ) -> Result<BTreeSet<GridPoint>, CompareError> {
        ensure_comparable(left, right)?;
        Ok(self.differing_cells(left, right, threshold).collect())
    }

    /// 生成与源图同尺寸的差异蒙版：差异像素为 `highlight`，其余为 `background`。
    pub fn difference_mask(
        &self,
        left: &RgbaImage,
        right: &RgbaImage,
        threshold: u32,
        background: Rgba<u8>,
        highlight: Rgba<u8>,
    ) -> Result<RgbaImage, CompareError> {
        let (width, height) = ensure_comparable(left, right)?;
        let metric = self.metric.as_ref();

        Ok(RgbaImage::from_fn(width, height, |x, y| {
            if metric.pixel_equals_within(*left.get_pixel(x, y), *right.get_pixel(x, y), threshold) {
                background
            } else {
                highlight
            }
        }))
    }
}

impl Differ for FullScanDiffer {
    fn differences<'a>(
        &'a self,
        left: &'a RgbaImage,
        right: &'a RgbaImage,
        threshold: u32,
    ) -> Result<Regions<'a>, CompareError> {
        let (width, height) = ensure_comparable(left, right)?;
        log::debug!("逐像素扫描 {}x{}（threshold={}）", width, height, threshold);

        Ok(Box::new(
            self.differing_cells(left, right, threshold).map(Region::from),
        ))
    }

    fn differences_shared(
        &self,
        left: &SharedRaster,
        right: &SharedRaster,
        threshold: u32,
    ) -> Result<RegionStream, CompareError> {
        let (width, height) = SharedRaster::read_pair(left, right, ensure_comparable)?;
        log::debug!("增量逐像素扫描 {}x{}（threshold={}）", width, height, threshold);

        let cursor = ScanCursor {
            left: left.clone(),
            right: right.clone(),
            metric: Arc::clone(&self.metric),
            threshold,
            width,
            height,
            x: 0,
            y: 0,
            finished: false,
        };

        Ok(stream::unfold(cursor, |mut cursor| async move {
            let item = cursor.next_region().await?;
            Some((item, cursor))
        })
        .boxed())
    }
}

/// 增量扫描游标：记录下一次要检查的坐标。
struct ScanCursor {
    left: SharedRaster,
    right: SharedRaster,
    metric: Arc<dyn PixelMetric>,
    threshold: u32,
    width: u32,
    height: u32,
    x: u32,
    y: u32,
    finished: bool,
}

impl ScanCursor {
    async fn next_region(&mut self) -> Option<Result<Region, CompareError>> {
        loop {
            if self.finished || self.x >= self.width {
                return None;
            }

            let (left, right) = (self.left.clone(), self.right.clone());
            let step = SharedRaster::read_pair(&left, &right, |l, r| self.scan_column(l, r));

            match step {
                Err(err) => {
                    self.finished = true;
                    return Some(Err(err));
                }
                Ok(Some(point)) => {
                    tokio::task::yield_now().await;
                    return Some(Ok(Region::from(point)));
                }
                Ok(None) => tokio::task::yield_now().await,
            }
        }
    }

    /// 在锁内从游标位置扫描到下一个差异点或当前列末尾。
    fn scan_column(
        &mut self,
        left: &RgbaImage,
        right: &RgbaImage,
    ) -> Result<Option<GridPoint>, CompareError> {
        let expected = (self.width, self.height);
        if left.dimensions() != expected {
            return Err(CompareError::size_mismatch(expected, left.dimensions()));
        }
        if right.dimensions() != expected {
            return Err(CompareError::size_mismatch(expected, right.dimensions()));
        }

        let x = self.x;
        let mut found = None;
        while self.y < self.height {
            let y = self.y;
            self.y += 1;

            if !self.metric.pixel_equals_within(
                *left.get_pixel(x, y),
                *right.get_pixel(x, y),
                self.threshold,
            ) {
                found = Some(GridPoint::new(x, y));
                break;
            }
        }

        if self.y >= self.height {
            self.x += 1;
            self.y = 0;
        }

        Ok(found)
    }
}
