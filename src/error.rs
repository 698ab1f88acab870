//! 统一错误类型模块
//!
//! # 设计思路
//!
//! 定义应用级 `AppError`，汇总比对引擎错误、文件 I/O 错误与命令行参数错误，
//! 入口只需处理一种错误类型。
//!
//! # 实现思路
//!
//! - 使用 `thiserror` 派生可读错误消息。
//! - 为 `CompareError` / `io::Error` 提供 `From` 转换，调用处直接 `?`。
//! - 实现 `Serialize` 将错误序列化为字符串，便于请求层直接返回。

use serde::Serialize;

use crate::comparer::CompareError;

/// 应用级统一错误类型
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 比对链路错误（输入 / 检测 / 存储 / 后台任务 / 编解码）
    #[error("{0}")]
    Compare(#[from] CompareError),

    /// 文件系统 I/O 错误
    #[error("文件系统错误: {0}")]
    Io(#[from] std::io::Error),

    /// 命令行参数错误
    #[error("参数错误: {0}")]
    Usage(String),
}

impl AppError {
    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            Self::Compare(err) => err.code(),
            Self::Io(_) => "E_IO",
            Self::Usage(_) => "E_USAGE",
        }
    }
}

/// 将错误序列化为人类可读的字符串。
impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_errors_keep_their_code_and_message() {
        let err: AppError = CompareError::MissingInput("left").into();

        assert_eq!(err.code(), "E_MISSING_INPUT");
        assert_eq!(
            serde_json::to_string(&err).expect("serialize"),
            format!("\"{}\"", CompareError::MissingInput("left"))
        );
    }

    #[test]
    fn io_errors_convert() {
        let err: AppError = std::io::Error::new(std::io::ErrorKind::NotFound, "left.png").into();

        assert_eq!(err.code(), "E_IO");
        assert!(err.to_string().contains("left.png"));
    }
}
