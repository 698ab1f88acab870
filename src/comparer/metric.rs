//! # 像素度量模块
//!
//! ## 设计思路
//!
//! `PixelMetric` 是“两个像素在阈值内是否相等”的纯函数能力接口，差异检测器通过组合注入具体策略。
//! 度量无状态、无副作用，可在线程间任意共享。
//!
//! ## 内置策略
//!
//! - `ChannelDistanceMetric`：RGB 欧氏距离 **加上** Alpha 通道绝对差（不是四通道欧氏距离）。
//! - `PerceptualMetric`：色相/饱和度/亮度三维欧氏距离，忽略 Alpha。
//!
//! 两者判定均为 `distance <= threshold`，阈值 0 表示必须完全相等。

use image::Rgba;

/// 像素相等判定接口。
pub trait PixelMetric: Send + Sync {
    /// 在给定阈值内判定两个像素是否相等。
    fn pixel_equals_within(&self, left: Rgba<u8>, right: Rgba<u8>, threshold: u32) -> bool;

    /// 零阈值判定，等价于 `pixel_equals_within(left, right, 0)`。
    fn pixel_equals(&self, left: Rgba<u8>, right: Rgba<u8>) -> bool {
        self.pixel_equals_within(left, right, 0)
    }
}

/// 通道距离度量：`sqrt(dR² + dG² + dB²) + |dA| <= threshold`。
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelDistanceMetric;

impl ChannelDistanceMetric {
    pub fn distance(left: Rgba<u8>, right: Rgba<u8>) -> f64 {
        let [lr, lg, lb, la] = left.0;
        let [rr, rg, rb, ra] = right.0;

        let dr = f64::from(lr) - f64::from(rr);
        let dg = f64::from(lg) - f64::from(rg);
        let db = f64::from(lb) - f64::from(rb);
        let da = f64::from(la) - f64::from(ra);

        (dr * dr + dg * dg + db * db).sqrt() + da.abs()
    }
}

impl PixelMetric for ChannelDistanceMetric {
    fn pixel_equals_within(&self, left: Rgba<u8>, right: Rgba<u8>, threshold: u32) -> bool {
        Self::distance(left, right) <= f64::from(threshold)
    }
}

/// 像素的色相/饱和度/亮度分解。
///
/// 色相取值 `[0, 360)` 度，饱和度与亮度取值 `[0, 1]`（HSL 语义下的 lightness）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hsb {
    pub hue: f32,
    pub saturation: f32,
    pub brightness: f32,
}

impl Hsb {
    pub fn from_rgba(pixel: Rgba<u8>) -> Self {
        let [r, g, b, _] = pixel.0;
        let r = f32::from(r) / 255.0;
        let g = f32::from(g) / 255.0;
        let b = f32::from(b) / 255.0;

        let max = r.max(g).max(b);
        let min = r.min(g).min(b);
        let brightness = (max + min) / 2.0;

        if max == min {
            return Self {
                hue: 0.0,
                saturation: 0.0,
                brightness,
            };
        }

        let delta = max - min;
        let saturation = if brightness <= 0.5 {
            delta / (max + min)
        } else {
            delta / (2.0 - max - min)
        };

        let mut hue = if r == max {
            (g - b) / delta
        } else if g == max {
            2.0 + (b - r) / delta
        } else {
            4.0 + (r - g) / delta
        };
        hue *= 60.0;
        if hue < 0.0 {
            hue += 360.0;
        }

        Self {
            hue,
            saturation,
            brightness,
        }
    }
}

/// 感知度量：`sqrt(dHue² + dSat² + dBright²) <= threshold`，忽略 Alpha。
#[derive(Debug, Clone, Copy, Default)]
pub struct PerceptualMetric;

impl PerceptualMetric {
    pub fn distance(left: Rgba<u8>, right: Rgba<u8>) -> f64 {
        let l = Hsb::from_rgba(left);
        let r = Hsb::from_rgba(right);

        let dh = f64::from(l.hue) - f64::from(r.hue);
        let ds = f64::from(l.saturation) - f64::from(r.saturation);
        let db = f64::from(l.brightness) - f64::from(r.brightness);

        (dh * dh + ds * ds + db * db).sqrt()
    }
}

impl PixelMetric for PerceptualMetric {
    fn pixel_equals_within(&self, left: Rgba<u8>, right: Rgba<u8>, threshold: u32) -> bool {
        Self::distance(left, right) <= f64::from(threshold)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
    const TAN: Rgba<u8> = Rgba([210, 180, 140, 255]);

    fn argb(a: u8, r: u8, g: u8, b: u8) -> Rgba<u8> {
        Rgba([r, g, b, a])
    }

    #[test]
    fn channel_same_color_is_equal_without_threshold() {
        assert!(ChannelDistanceMetric.pixel_equals(RED, RED));
        assert!(ChannelDistanceMetric.pixel_equals_within(RED, RED, 0));
        assert!(ChannelDistanceMetric.pixel_equals_within(RED, RED, 1));
    }

    #[test]
    fn channel_different_color_is_not_equal_without_threshold() {
        assert!(!ChannelDistanceMetric.pixel_equals(RED, TAN));
        assert!(!ChannelDistanceMetric.pixel_equals_within(RED, TAN, 0));
    }

    #[test]
    fn channel_alpha_only_difference_counts() {
        let left = argb(10, 100, 100, 100);
        let right = argb(50, 100, 100, 100);

        assert!(!ChannelDistanceMetric.pixel_equals(left, right));
    }

    #[test]
    fn channel_differences_below_threshold_are_equal() {
        let metric = ChannelDistanceMetric;

        assert!(metric.pixel_equals_within(argb(1, 100, 100, 100), argb(2, 100, 100, 100), 2));
        // sqrt(2^2 * 3) ~ 3.46
        assert!(metric.pixel_equals_within(argb(1, 100, 100, 100), argb(1, 98, 98, 98), 4));
        assert!(metric.pixel_equals_within(argb(1, 100, 100, 100), argb(2, 98, 98, 98), 5));
    }

    #[test]
    fn channel_distance_exactly_on_threshold_is_equal() {
        let metric = ChannelDistanceMetric;

        assert!(metric.pixel_equals_within(argb(1, 100, 100, 100), argb(2, 100, 100, 100), 1));
        assert!(metric.pixel_equals_within(argb(1, 100, 100, 100), argb(1, 98, 100, 100), 2));
        assert!(metric.pixel_equals_within(argb(1, 100, 100, 100), argb(2, 100, 98, 100), 3));
        // 3-4-0 triangle lands exactly on 5
        assert!(metric.pixel_equals_within(argb(9, 10, 10, 10), argb(9, 13, 14, 10), 5));
    }

    #[test]
    fn channel_differences_above_threshold_are_not_equal() {
        let metric = ChannelDistanceMetric;

        assert!(!metric.pixel_equals_within(argb(1, 100, 100, 100), argb(3, 100, 100, 100), 1));
        assert!(!metric.pixel_equals_within(argb(1, 100, 100, 100), argb(1, 98, 98, 98), 3));
        assert!(!metric.pixel_equals_within(argb(1, 100, 100, 100), argb(2, 98, 98, 98), 4));
    }

    #[test]
    fn channel_alpha_is_added_linearly_not_euclidean() {
        // 四通道欧氏距离为 5，而加法组合为 3 + 4 = 7
        let left = argb(0, 0, 0, 0);
        let right = argb(4, 3, 0, 0);

        assert_eq!(ChannelDistanceMetric::distance(left, right), 7.0);
        assert!(!ChannelDistanceMetric.pixel_equals_within(left, right, 5));
        assert!(ChannelDistanceMetric.pixel_equals_within(left, right, 7));
    }

    #[test]
    fn hsb_of_primary_colors() {
        let red = Hsb::from_rgba(RED);
        assert_eq!(red.hue, 0.0);
        assert_eq!(red.saturation, 1.0);
        assert_eq!(red.brightness, 0.5);

        let green = Hsb::from_rgba(Rgba([0, 255, 0, 255]));
        assert_eq!(green.hue, 120.0);

        let blue = Hsb::from_rgba(Rgba([0, 0, 255, 255]));
        assert_eq!(blue.hue, 240.0);

        let gray = Hsb::from_rgba(Rgba([128, 128, 128, 255]));
        assert_eq!(gray.hue, 0.0);
        assert_eq!(gray.saturation, 0.0);
    }

    #[test]
    fn perceptual_ignores_alpha() {
        let left = Rgba([40, 80, 120, 0]);
        let right = Rgba([40, 80, 120, 255]);

        assert!(PerceptualMetric.pixel_equals(left, right));
    }

    #[test]
    fn perceptual_hue_dominates_distance() {
        // 红 → 绿：色相相差 120 度
        let green = Rgba([0, 255, 0, 255]);

        assert!(!PerceptualMetric.pixel_equals_within(RED, green, 119));
        assert!(PerceptualMetric.pixel_equals_within(RED, green, 120));
    }
}
