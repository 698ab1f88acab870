//! # 差异绘制
//!
//! 把差异区域以空心矩形描边绘制到目标栅格上。
//!
//! - 矩形边坐标四舍五入到整数像素，描边覆盖 `(x, y)` 到 `(x + w, y + h)`（含两端）。
//! - 描边宽度大于 1 时以矩形边为中心向内外扩展。
//! - 异步绘制每个区域单独获取一次写锁，绘制之间让出执行权。

use futures_util::StreamExt;
use image::{Rgba, RgbaImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use super::{CompareError, Region, RegionStream, SharedRaster};

/// 差异区域描边绘制器。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DifferencePainter {
    color: Rgba<u8>,
    stroke_width: u32,
}

impl Default for DifferencePainter {
    fn default() -> Self {
        Self::new(Rgba([255, 0, 0, 255]), 1)
    }
}

impl DifferencePainter {
    pub fn new(color: Rgba<u8>, stroke_width: u32) -> Self {
        Self {
            color,
            stroke_width: stroke_width.max(1),
        }
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn stroke_width(&self) -> u32 {
        self.stroke_width
    }

    /// 同步绘制全部区域，返回绘制数量。空序列不修改图片。
    pub fn paint<I>(&self, image: &mut RgbaImage, regions: I) -> usize
    where
        I: IntoIterator<Item = Region>,
    {
        let mut painted = 0;
        for region in regions {
            self.draw_region(image, region);
            painted += 1;
        }
        painted
    }

    /// 消费区域流并逐个绘制到共享栅格。流中出现错误时立即返回该错误。
    pub async fn paint_async(
        &self,
        target: &SharedRaster,
        mut regions: RegionStream,
    ) -> Result<usize, CompareError> {
        let mut painted = 0;

        while let Some(item) = regions.next().await {
            let region = item?;
            target.write(|image| self.draw_region(image, region));
            painted += 1;
            tokio::task::yield_now().await;
        }

        Ok(painted)
    }

    pub fn draw_region(&self, image: &mut RgbaImage, region: Region) {
        let left = region.x.round() as i32;
        let top = region.y.round() as i32;
        let right = region.right().round() as i32;
        let bottom = region.bottom().round() as i32;

        for offset in stroke_offsets(self.stroke_width) {
            let width = right - left + 2 * offset + 1;
            let height = bottom - top + 2 * offset + 1;
            if width <= 0 || height <= 0 {
                continue;
            }

            let rect = Rect::at(left - offset, top - offset).of_size(width as u32, height as u32);
            draw_hollow_rect_mut(image, rect, self.color);
        }
    }
}

/// 描边宽度展开为以 0 为中心的偏移序列，例如 4 → `-1, 0, 1, 2`。
pub(crate) fn stroke_offsets(stroke_width: u32) -> impl Iterator<Item = i32> {
    let stroke = stroke_width.max(1) as i32;
    let start = -((stroke - 1) / 2);
    (0..stroke).map(move |k| start + k)
}
