//! # 图片比对模块
//!
//! ## 模块结构
//!
//! ```text
//! comparer/
//! ├── metric.rs   // 像素度量：通道距离 / 感知距离
//! ├── region.rs   // 差异区域与网格点
//! ├── raster.rs   // 携带读写锁的共享栅格
//! ├── differ.rs   // Differ 接口与逐像素检测
//! ├── grid.rs     // 网格缩放检测（可嵌套）
//! ├── painter.rs  // 差异描边绘制
//! ├── outline.rs  // 差异块外轮廓描绘
//! ├── store.rs    // 结果存储与任务标识
//! ├── manager.rs  // 同步 / 后台比对任务管理
//! ├── config.rs   // 配置与档位
//! ├── service.rs  // 面向请求层的服务
//! └── error.rs    // 统一错误类型
//! ```
//!
//! ## 处理链路
//!
//! ```text
//! CompareRequest ──► Differ ──► Region 序列 ──► DifferencePainter ──► ResultStore
//!                      │                                                  │
//!                 GridDiffer(FullScanDiffer)                      JobId + JobState
//! ```

mod config;
pub(crate) mod differ;
mod error;
mod grid;
mod manager;
mod metric;
mod outline;
mod painter;
mod raster;
mod region;
mod service;
mod store;

pub use config::{CompareConfig, CompareProfile, CompareSettings, MetricKind};
pub use differ::{Differ, FullScanDiffer, RegionStream, Regions};
pub use error::CompareError;
pub use grid::GridDiffer;
pub use manager::{BackgroundJob, CompareRequest, ComparisonJobManager, JobEvent, JobState};
pub use metric::{ChannelDistanceMetric, Hsb, PerceptualMetric, PixelMetric};
pub use outline::BorderTracer;
pub use painter::DifferencePainter;
pub use raster::SharedRaster;
pub use region::{GridPoint, Region};
pub use service::CompareService;
pub use store::{JobId, ResultStore};
