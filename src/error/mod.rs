//! 错误处理模块
//!
//! 提供统一的错误处理机制，支持错误代码分类和错误转换。
//! 调用方通过错误代码区分解析失败、通信失败和超时失败。

pub mod builder;
pub mod code;
pub mod conversions;
pub mod flare_error;

// 重新导出公共类型和函数
pub use builder::ErrorBuilder;
pub use code::{ErrorCategory, ErrorCode};
pub use flare_error::{FlareError, Result};

/// 将外部错误转换为 `FlareError`
pub fn map_error<E, S>(error: E, code: ErrorCode, message: S) -> FlareError
where
    E: std::fmt::Display,
    S: Into<String>,
{
    ErrorBuilder::new(code, message.into())
        .details(error.to_string())
        .build()
}

/// `Result` 的辅助扩展，用于快速附加错误代码
pub trait ResultExt<T> {
    fn or_code<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>;
}

impl<T, E> ResultExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn or_code<S>(self, code: ErrorCode, message: S) -> Result<T>
    where
        S: Into<String>,
    {
        self.map_err(|err| map_error(err, code, message))
    }
}
