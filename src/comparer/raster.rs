//! # 共享栅格
//!
//! ## 设计思路
//!
//! 栅格与其互斥原语绑定为同一个类型 `SharedRaster`，不再在无关对象之间传递裸锁。
//! 对外只提供作用域访问（`read` / `write` / `read_pair`），临界区不可能被遗忘或泄漏到闭包之外。
//!
//! ## 实现思路
//!
//! - 内部为 `Arc<RwLock<RgbaImage>>`，克隆句柄即共享同一张图。
//! - 锁中毒时记录告警并继续使用恢复数据：栅格允许被观察到“部分绘制”的状态。
//! - `read_pair` 识别左右为同一句柄的情况，只加一次读锁。

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use image::RgbaImage;

/// 携带自身读写锁的共享栅格句柄。
#[derive(Clone)]
pub struct SharedRaster {
    inner: Arc<RwLock<RgbaImage>>,
}

impl SharedRaster {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(image)),
        }
    }

    fn read_guard(&self) -> RwLockReadGuard<'_, RgbaImage> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("栅格读锁已中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    fn write_guard(&self) -> RwLockWriteGuard<'_, RgbaImage> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("栅格写锁已中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    /// 持读锁执行闭包。
    pub fn read<R>(&self, f: impl FnOnce(&RgbaImage) -> R) -> R {
        let guard = self.read_guard();
        f(&guard)
    }

    /// 持写锁执行闭包。
    pub fn write<R>(&self, f: impl FnOnce(&mut RgbaImage) -> R) -> R {
        let mut guard = self.write_guard();
        f(&mut guard)
    }

    /// 同时持有两张图的读锁执行闭包（固定先左后右的加锁顺序）。
    pub fn read_pair<R>(
        left: &SharedRaster,
        right: &SharedRaster,
        f: impl FnOnce(&RgbaImage, &RgbaImage) -> R,
    ) -> R {
        if left.same_as(right) {
            let guard = left.read_guard();
            return f(&guard, &guard);
        }

        let left_guard = left.read_guard();
        let right_guard = right.read_guard();
        f(&left_guard, &right_guard)
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.read(|image| image.dimensions())
    }

    /// 复制当前内容（可能是绘制中途的状态）。
    pub fn snapshot(&self) -> RgbaImage {
        self.read(|image| image.clone())
    }

    /// 两个句柄是否指向同一张图。
    pub fn same_as(&self, other: &SharedRaster) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl From<RgbaImage> for SharedRaster {
    fn from(image: RgbaImage) -> Self {
        Self::new(image)
    }
}

impl std::fmt::Debug for SharedRaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (width, height) = self.dimensions();
        f.debug_struct("SharedRaster")
            .field("width", &width)
            .field("height", &height)
            .finish()
    }
}
