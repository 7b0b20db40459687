//! 错误代码和错误类别定义

use serde::{Deserialize, Serialize};
use std::fmt;

/// 错误代码枚举
///
/// 错误代码按类别分组，每个类别占用1000个代码范围：
/// - 1000-1999: 连接相关错误
/// - 3000-3999: 协议相关错误
/// - 4000-4999: 路由解析相关错误
/// - 5000-5999: 协调存储相关错误
/// - 6000-6999: 系统相关错误
/// - 8000-8999: 序列化相关错误
/// - 9000-9999: 通用错误
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(u32)]
pub enum ErrorCode {
    // ============================================================
    // 连接相关错误 (1000-1999)
    // ============================================================
    ConnectionFailed = 1000,
    ConnectionTimeout = 1001,
    ConnectionClosed = 1002,
    ConnectionRefused = 1003,

    // ============================================================
    // 协议相关错误 (3000-3999)
    // ============================================================
    ProtocolError = 3000,
    MessageFormatError = 3003,

    // ============================================================
    // 路由解析相关错误 (4000-4999)
    // ============================================================
    ServiceUnresolvable = 4000,
    RouteNotFound = 4001,

    // ============================================================
    // 协调存储相关错误 (5000-5999)
    // ============================================================
    NodeNotFound = 5000,
    NodeExists = 5001,
    NodeNotEmpty = 5002,
    StoreUnavailable = 5003,

    // ============================================================
    // 系统相关错误 (6000-6999)
    // ============================================================
    InternalError = 6000,
    ServiceUnavailable = 6001,
    ConfigurationError = 6003,

    // ============================================================
    // 序列化相关错误 (8000-8999)
    // ============================================================
    SerializationError = 8000,
    DeserializationError = 8001,

    // ============================================================
    // 通用错误 (9000-9999)
    // ============================================================
    GeneralError = 9000,
    InvalidParameter = 9001,
    OperationNotSupported = 9002,
    OperationFailed = 9003,
    OperationTimeout = 9004,
    UnknownError = 9999,
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl ErrorCode {
    /// 获取错误代码的数字值
    #[inline]
    pub fn as_u32(&self) -> u32 {
        *self as u32
    }

    /// 从数字值创建错误代码
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            1000 => Some(ErrorCode::ConnectionFailed),
            1001 => Some(ErrorCode::ConnectionTimeout),
            1002 => Some(ErrorCode::ConnectionClosed),
            1003 => Some(ErrorCode::ConnectionRefused),
            3000 => Some(ErrorCode::ProtocolError),
            3003 => Some(ErrorCode::MessageFormatError),
            4000 => Some(ErrorCode::ServiceUnresolvable),
            4001 => Some(ErrorCode::RouteNotFound),
            5000 => Some(ErrorCode::NodeNotFound),
            5001 => Some(ErrorCode::NodeExists),
            5002 => Some(ErrorCode::NodeNotEmpty),
            5003 => Some(ErrorCode::StoreUnavailable),
            6000 => Some(ErrorCode::InternalError),
            6001 => Some(ErrorCode::ServiceUnavailable),
            6003 => Some(ErrorCode::ConfigurationError),
            8000 => Some(ErrorCode::SerializationError),
            8001 => Some(ErrorCode::DeserializationError),
            9000 => Some(ErrorCode::GeneralError),
            9001 => Some(ErrorCode::InvalidParameter),
            9002 => Some(ErrorCode::OperationNotSupported),
            9003 => Some(ErrorCode::OperationFailed),
            9004 => Some(ErrorCode::OperationTimeout),
            9999 => Some(ErrorCode::UnknownError),
            _ => None,
        }
    }

    /// 获取错误代码的英文标识符
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConnectionFailed => "CONNECTION_FAILED",
            ErrorCode::ConnectionTimeout => "CONNECTION_TIMEOUT",
            ErrorCode::ConnectionClosed => "CONNECTION_CLOSED",
            ErrorCode::ConnectionRefused => "CONNECTION_REFUSED",
            ErrorCode::ProtocolError => "PROTOCOL_ERROR",
            ErrorCode::MessageFormatError => "MESSAGE_FORMAT_ERROR",
            ErrorCode::ServiceUnresolvable => "SERVICE_UNRESOLVABLE",
            ErrorCode::RouteNotFound => "ROUTE_NOT_FOUND",
            ErrorCode::NodeNotFound => "NODE_NOT_FOUND",
            ErrorCode::NodeExists => "NODE_EXISTS",
            ErrorCode::NodeNotEmpty => "NODE_NOT_EMPTY",
            ErrorCode::StoreUnavailable => "STORE_UNAVAILABLE",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::ConfigurationError => "CONFIGURATION_ERROR",
            ErrorCode::SerializationError => "SERIALIZATION_ERROR",
            ErrorCode::DeserializationError => "DESERIALIZATION_ERROR",
            ErrorCode::GeneralError => "GENERAL_ERROR",
            ErrorCode::InvalidParameter => "INVALID_PARAMETER",
            ErrorCode::OperationNotSupported => "OPERATION_NOT_SUPPORTED",
            ErrorCode::OperationFailed => "OPERATION_FAILED",
            ErrorCode::OperationTimeout => "OPERATION_TIMEOUT",
            ErrorCode::UnknownError => "UNKNOWN_ERROR",
        }
    }

    /// 获取错误代码的类别（用于错误分类）
    pub fn category(&self) -> ErrorCategory {
        match self.as_u32() {
            1000..=1999 => ErrorCategory::Connection,
            3000..=3999 => ErrorCategory::Protocol,
            4000..=4999 => ErrorCategory::Routing,
            5000..=5999 => ErrorCategory::Store,
            6000..=6999 => ErrorCategory::System,
            8000..=8999 => ErrorCategory::Serialization,
            _ => ErrorCategory::General,
        }
    }

    /// 是否属于可归因于远端地址的通信失败
    ///
    /// 超时单独归类，不在此列
    pub fn is_communication(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Protocol
        ) && *self != ErrorCode::ConnectionTimeout
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::ConnectionTimeout
                | ErrorCode::ConnectionClosed
                | ErrorCode::StoreUnavailable
                | ErrorCode::ServiceUnavailable
                | ErrorCode::OperationTimeout
        )
    }
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCategory {
    Connection,
    Protocol,
    Routing,
    Store,
    System,
    Serialization,
    General,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorCategory::Connection => write!(f, "CONNECTION"),
            ErrorCategory::Protocol => write!(f, "PROTOCOL"),
            ErrorCategory::Routing => write!(f, "ROUTING"),
            ErrorCategory::Store => write!(f, "STORE"),
            ErrorCategory::System => write!(f, "SYSTEM"),
            ErrorCategory::Serialization => write!(f, "SERIALIZATION"),
            ErrorCategory::General => write!(f, "GENERAL"),
        }
    }
}
