//! # 结果存储
//!
//! 以 `JobId` 为键保存比对结果栅格。条目一直保留到显式删除为止。
//!
//! - 标识使用 ULID，冲突时在同一把写锁内重新生成，保证返回的标识未被占用。
//! - 读取返回共享句柄：后台任务仍在绘制时，调用方看到的是当前进度下的图片。

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::str::FromStr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use ulid::Ulid;

use super::{CompareError, SharedRaster};

/// 比对任务/结果标识。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(Ulid);

impl JobId {
    pub fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for JobId {
    type Err = CompareError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|e| CompareError::InvalidFormat(format!("无效的任务标识 '{}'：{}", s, e)))
    }
}

/// 结果栅格存储。
#[derive(Default)]
pub struct ResultStore {
    entries: RwLock<HashMap<JobId, SharedRaster>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read_entries(&self) -> RwLockReadGuard<'_, HashMap<JobId, SharedRaster>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("结果存储读锁已中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    fn write_entries(&self) -> RwLockWriteGuard<'_, HashMap<JobId, SharedRaster>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("结果存储写锁已中毒，继续使用恢复数据");
                poisoned.into_inner()
            }
        }
    }

    /// 保存栅格并返回新标识。
    pub fn create(&self, raster: SharedRaster) -> JobId {
        let mut entries = self.write_entries();

        loop {
            let id = JobId::generate();
            match entries.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(raster);
                    return id;
                }
                Entry::Occupied(_) => log::warn!("任务标识冲突，重新生成：{}", id),
            }
        }
    }

    pub fn read(&self, id: &JobId) -> Option<SharedRaster> {
        self.read_entries().get(id).cloned()
    }

    pub fn delete(&self, id: &JobId) -> Result<(), CompareError> {
        self.write_entries()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| CompareError::NotFound(format!("结果不存在：'{}'", id)))
    }

    pub fn contains(&self, id: &JobId) -> bool {
        self.read_entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.read_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_entries().is_empty()
    }
}
