//! # 差异区域与网格点
//!
//! - `Region`：轴对齐矩形。逐像素检测器产出整数单元格（宽高为 1），
//!   网格检测器产出按源图比例缩放后的浮点矩形。
//! - `GridPoint`：差异点，按 `(x, y)` 字典序排序，用于集合成员查询（边界描绘）。

/// 差异区域（轴对齐矩形）。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Region {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// 位于 `(x, y)` 的单位单元格。
    pub fn cell(x: u32, y: u32) -> Self {
        Self::new(x as f32, y as f32, 1.0, 1.0)
    }

    /// 坐标与尺寸按各轴比例缩放。
    pub fn scaled(self, x_scale: f32, y_scale: f32) -> Self {
        Self::new(
            self.x * x_scale,
            self.y * y_scale,
            self.width * x_scale,
            self.height * y_scale,
        )
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }

    /// 浮点误差容忍的近似相等。
    pub fn approx_eq(&self, other: &Region, epsilon: f32) -> bool {
        (self.x - other.x).abs() <= epsilon
            && (self.y - other.y).abs() <= epsilon
            && (self.width - other.width).abs() <= epsilon
            && (self.height - other.height).abs() <= epsilon
    }
}

impl From<GridPoint> for Region {
    fn from(point: GridPoint) -> Self {
        Self::cell(point.x, point.y)
    }
}

/// 网格坐标点。派生的 `Ord` 即 “先 x 后 y” 升序。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GridPoint {
    pub x: u32,
    pub y: u32,
}

impl GridPoint {
    pub fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// 相邻点；越过坐标下界时返回 `None`。
    pub fn above(self) -> Option<Self> {
        self.y.checked_sub(1).map(|y| Self::new(self.x, y))
    }

    pub fn below(self) -> Option<Self> {
        self.y.checked_add(1).map(|y| Self::new(self.x, y))
    }

    pub fn left(self) -> Option<Self> {
        self.x.checked_sub(1).map(|x| Self::new(x, self.y))
    }

    pub fn right(self) -> Option<Self> {
        self.x.checked_add(1).map(|x| Self::new(x, self.y))
    }
}
