//! # 图片差异比对引擎：库入口
//!
//! ## 架构总览
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │              请求层 (CLI / 上传接口)                      │
//! │   原始字节 / Base64 ──► codec::decode_upload              │
//! └───────┬──────────────────────────────────────────────────┘
//!         ↕ RgbaImage / JobId / 状态字符串
//! ┌───────┼──────────────────────────────────────────────────┐
//! │       ↕            比对引擎                               │
//! │                                                          │
//! │  ┌─ CompareService ── 配置快照 + 档位切换                 │
//! │  │                                                       │
//! │  ├─ ComparisonJobManager ── 同步 / 后台任务 + 状态表       │
//! │  │   ├─ Differ            FullScanDiffer / GridDiffer     │
//! │  │   ├─ DifferencePainter 差异描边                       │
//! │  │   └─ ResultStore       JobId → SharedRaster            │
//! │  │                                                       │
//! │  └─ BorderTracer ──── 差异块外轮廓                        │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! ## 模块职责
//!
//! | 模块 | 职责 |
//! |------|------|
//! | [`error`] | 应用级错误类型 `AppError` |
//! | [`codec`] | 上传图片安全解码、结果图编码 |
//! | [`comparer`] | 像素度量、差异检测、绘制、存储与任务管理 |

pub mod codec;
pub mod comparer;
pub mod error;
