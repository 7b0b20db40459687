//! 统一错误类型

use super::code::{ErrorCategory, ErrorCode};
use std::collections::HashMap;
use thiserror::Error;

/// 路由核心统一错误类型
#[derive(Error, Debug, Clone)]
pub enum FlareError {
    /// 带错误代码的错误（调用方可按代码区分失败类型）
    #[error("错误 [{code}] {reason}", code = .code.as_str())]
    Localized {
        code: ErrorCode,
        reason: String,
        details: Option<String>,
        params: Option<HashMap<String, String>>,
        timestamp: chrono::DateTime<chrono::Utc>,
    },

    /// 系统错误（内部错误）
    #[error("系统错误: {0}")]
    System(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl FlareError {
    /// 创建带错误代码的错误
    pub fn localized(code: ErrorCode, reason: impl Into<String>) -> Self {
        FlareError::Localized {
            code,
            reason: reason.into(),
            details: None,
            params: None,
            timestamp: chrono::Utc::now(),
        }
    }

    /// 创建系统错误
    pub fn system(msg: impl Into<String>) -> Self {
        FlareError::System(msg.into())
    }

    /// 创建 IO 错误
    pub fn io(msg: impl Into<String>) -> Self {
        FlareError::Io(msg.into())
    }

    // ============================================================
    // 便捷方法：通信相关错误
    // ============================================================

    /// 创建连接失败错误
    pub fn connection_failed(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConnectionFailed, reason)
    }

    /// 创建连接被拒绝错误
    pub fn connection_refused(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConnectionRefused, reason)
    }

    /// 创建连接已关闭错误
    pub fn connection_closed(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConnectionClosed, reason)
    }

    /// 创建协议错误
    pub fn protocol_error(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ProtocolError, reason)
    }

    // ============================================================
    // 便捷方法：路由相关错误
    // ============================================================

    /// 创建服务无法解析错误
    pub fn service_unresolvable(service_id: impl Into<String>) -> Self {
        let service_id = service_id.into();
        let mut params = HashMap::new();
        params.insert("service_id".to_string(), service_id.clone());
        FlareError::Localized {
            code: ErrorCode::ServiceUnresolvable,
            reason: format!("无法解析服务Id：{} 的地址信息", service_id),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    // ============================================================
    // 便捷方法：协调存储相关错误
    // ============================================================

    /// 创建节点不存在错误
    pub fn node_not_found(path: impl Into<String>) -> Self {
        Self::with_path(ErrorCode::NodeNotFound, "节点不存在", path)
    }

    /// 创建节点已存在错误
    pub fn node_exists(path: impl Into<String>) -> Self {
        Self::with_path(ErrorCode::NodeExists, "节点已存在", path)
    }

    /// 创建节点存在子节点错误
    pub fn node_not_empty(path: impl Into<String>) -> Self {
        Self::with_path(ErrorCode::NodeNotEmpty, "节点存在子节点", path)
    }

    /// 创建协调存储不可用错误
    pub fn store_unavailable(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::StoreUnavailable, reason)
    }

    fn with_path(code: ErrorCode, reason: &str, path: impl Into<String>) -> Self {
        let mut params = HashMap::new();
        params.insert("path".to_string(), path.into());
        FlareError::Localized {
            code,
            reason: reason.to_string(),
            details: None,
            params: Some(params),
            timestamp: chrono::Utc::now(),
        }
    }

    // ============================================================
    // 便捷方法：序列化相关错误
    // ============================================================

    /// 创建序列化错误
    pub fn serialization_error(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::SerializationError, reason)
    }

    /// 创建反序列化错误
    pub fn deserialization_error(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::DeserializationError, reason)
    }

    // ============================================================
    // 便捷方法：通用错误
    // ============================================================

    /// 创建参数错误
    pub fn invalid_parameter(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::InvalidParameter, reason)
    }

    /// 创建配置错误
    pub fn configuration_error(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::ConfigurationError, reason)
    }

    /// 创建操作超时错误
    pub fn timeout(reason: impl Into<String>) -> Self {
        Self::localized(ErrorCode::OperationTimeout, reason)
    }

    // ============================================================
    // 信息获取方法
    // ============================================================

    /// 获取错误代码
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            FlareError::Localized { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 获取错误类别
    pub fn category(&self) -> ErrorCategory {
        match self {
            FlareError::Localized { code, .. } => code.category(),
            FlareError::System(_) => ErrorCategory::System,
            FlareError::Io(_) => ErrorCategory::Connection,
        }
    }

    /// 获取错误原因
    pub fn reason(&self) -> &str {
        match self {
            FlareError::Localized { reason, .. } => reason,
            FlareError::System(msg) => msg,
            FlareError::Io(msg) => msg,
        }
    }

    /// 获取错误参数
    pub fn param(&self, key: &str) -> Option<&str> {
        match self {
            FlareError::Localized {
                params: Some(params),
                ..
            } => params.get(key).map(String::as_str),
            _ => None,
        }
    }

    /// 是否为通信失败（连接拒绝、重置、协议错误）
    pub fn is_communication(&self) -> bool {
        self.code().map(|c| c.is_communication()).unwrap_or(false)
    }

    /// 是否为超时失败
    pub fn is_timeout(&self) -> bool {
        matches!(
            self.code(),
            Some(ErrorCode::OperationTimeout) | Some(ErrorCode::ConnectionTimeout)
        )
    }

    /// 是否为服务无法解析
    pub fn is_unresolvable(&self) -> bool {
        self.code() == Some(ErrorCode::ServiceUnresolvable)
    }

    /// 是否为节点不存在
    pub fn is_node_not_found(&self) -> bool {
        self.code() == Some(ErrorCode::NodeNotFound)
    }

    /// 判断是否为可重试的错误
    pub fn is_retryable(&self) -> bool {
        self.code().map(|code| code.is_retryable()).unwrap_or(false)
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, FlareError>;
