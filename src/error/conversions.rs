//! 错误类型转换实现
//!
//! 提供各种错误类型之间的转换

use super::{ErrorBuilder, ErrorCode, FlareError};
use std::io;

impl From<io::Error> for FlareError {
    fn from(err: io::Error) -> Self {
        let code = match err.kind() {
            io::ErrorKind::ConnectionRefused => ErrorCode::ConnectionRefused,
            io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted => {
                ErrorCode::ConnectionClosed
            }
            io::ErrorKind::TimedOut => ErrorCode::ConnectionTimeout,
            _ => return FlareError::io(err.to_string()),
        };
        FlareError::localized(code, err.to_string())
    }
}

impl From<serde_json::Error> for FlareError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            FlareError::deserialization_error(format!("JSON 反序列化错误: {}", err))
        } else {
            FlareError::serialization_error(format!("JSON 序列化错误: {}", err))
        }
    }
}

impl From<toml::de::Error> for FlareError {
    fn from(err: toml::de::Error) -> Self {
        ErrorBuilder::new(ErrorCode::ConfigurationError, "配置解析失败")
            .details(err.to_string())
            .build()
    }
}

impl From<tokio::time::error::Elapsed> for FlareError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        FlareError::timeout(err.to_string())
    }
}

#[cfg(feature = "etcd")]
impl From<etcd_client::Error> for FlareError {
    fn from(err: etcd_client::Error) -> Self {
        ErrorBuilder::new(ErrorCode::StoreUnavailable, "etcd 请求失败")
            .details(err.to_string())
            .build()
    }
}
