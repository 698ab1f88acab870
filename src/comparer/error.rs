//! # 错误模型模块
//!
//! ## 设计思路
//!
//! 使用单一错误枚举承载比对链路（输入校验 → 差异检测 → 绘制 → 存储 → 后台任务）中的所有错误来源。
//! 通过 `thiserror` 保持人类可读错误，同时让调用侧可按分支匹配。
//!
//! `code()` / `stage()` 提供稳定的机器可读标识，供外层请求层直接透传。

/// 图片比对统一错误类型。
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    /// 必需的输入缺失（请求层未提供左图或右图）。
    #[error("缺少输入：{0}")]
    MissingInput(&'static str),

    /// 两张图尺寸不一致，或存在零面积图片。
    #[error("图片尺寸不一致或为空：左图 {left:?}，右图 {right:?}")]
    SizeMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("未找到：{0}")]
    NotFound(String),

    /// 后台任务执行期间发生的错误。
    #[error("后台任务失败：{0}")]
    Background(String),

    #[error("配置错误：{0}")]
    InvalidConfig(String),

    #[error("格式错误：{0}")]
    InvalidFormat(String),

    #[error("解码错误：{0}")]
    Decode(String),

    #[error("编码错误：{0}")]
    Encode(String),

    #[error("资源限制：{0}")]
    ResourceLimit(String),

    #[error("运行时错误：{0}")]
    Runtime(String),
}

impl CompareError {
    pub(crate) fn size_mismatch(left: (u32, u32), right: (u32, u32)) -> Self {
        Self::SizeMismatch { left, right }
    }

    /// 稳定错误码，供请求层按码分支。
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "E_MISSING_INPUT",
            Self::SizeMismatch { .. } => "E_SIZE_MISMATCH",
            Self::NotFound(_) => "E_NOT_FOUND",
            Self::Background(_) => "E_BACKGROUND",
            Self::InvalidConfig(_) => "E_INVALID_CONFIG",
            Self::InvalidFormat(_) => "E_INVALID_FORMAT",
            Self::Decode(_) => "E_DECODE",
            Self::Encode(_) => "E_ENCODE",
            Self::ResourceLimit(_) => "E_RESOURCE_LIMIT",
            Self::Runtime(_) => "E_RUNTIME",
        }
    }

    /// 出错阶段。
    pub fn stage(&self) -> &'static str {
        match self {
            Self::MissingInput(_) => "input",
            Self::SizeMismatch { .. } => "diff",
            Self::NotFound(_) => "store",
            Self::Background(_) | Self::Runtime(_) => "job",
            Self::InvalidConfig(_) => "config",
            Self::InvalidFormat(_) | Self::Decode(_) | Self::Encode(_) | Self::ResourceLimit(_) => {
                "codec"
            }
        }
    }
}

impl From<CompareError> for String {
    fn from(error: CompareError) -> Self {
        error.to_string()
    }
}
