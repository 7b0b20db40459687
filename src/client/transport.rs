//! 传输层接口
//!
//! 消息序列化和连接管理由宿主进程提供，这里只定义调用方需要的边界。

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::error::{FlareError, Result};
use crate::types::Endpoint;

/// 远程调用请求
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteInvokeMessage {
    pub service_id: String,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
}

impl RemoteInvokeMessage {
    pub fn new(service_id: impl Into<String>) -> Self {
        Self {
            service_id: service_id.into(),
            parameters: BTreeMap::new(),
        }
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

/// 远程调用结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteInvokeResultMessage {
    #[serde(default)]
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception_message: Option<String>,
}

impl RemoteInvokeResultMessage {
    pub fn new(result: impl Into<Value>) -> Self {
        Self {
            result: result.into(),
            exception_message: None,
        }
    }
}

/// 传输层错误
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// 连接失败、连接被拒绝或中断
    #[error("communication failure: {0}")]
    Communication(String),
    /// 请求在期限内没有完成
    #[error("request timed out")]
    Timeout,
    #[error("{0}")]
    Other(String),
}

impl From<TransportError> for FlareError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Communication(reason) => FlareError::connection_failed(reason),
            TransportError::Timeout => FlareError::timeout("Remote invocation timed out"),
            TransportError::Other(reason) => FlareError::system(reason),
        }
    }
}

/// 传输客户端
#[async_trait]
pub trait TransportClient: Send + Sync {
    async fn send(
        &self,
        message: RemoteInvokeMessage,
        cancel: CancellationToken,
    ) -> std::result::Result<RemoteInvokeResultMessage, TransportError>;
}

/// 传输客户端工厂
#[async_trait]
pub trait TransportClientFactory: Send + Sync {
    async fn create_client(&self, endpoint: &Endpoint) -> Result<Arc<dyn TransportClient>>;
}
