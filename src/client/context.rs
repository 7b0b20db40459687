//! 调用上下文
//!
//! 任务级的附件表，在 [`RpcContext::scope`] 范围内可读写。

use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::transport::RemoteInvokeMessage;

/// 调用时记录目标地址的附件键
pub const REMOTE_ADDRESS: &str = "RemoteAddress";

tokio::task_local! {
    static ATTACHMENTS: Arc<Mutex<HashMap<String, Value>>>;
}

/// 任务级调用上下文
pub struct RpcContext;

impl RpcContext {
    /// 在新的上下文中执行 future
    pub async fn scope<F: Future>(future: F) -> F::Output {
        ATTACHMENTS
            .scope(Arc::new(Mutex::new(HashMap::new())), future)
            .await
    }

    /// 设置附件；不在上下文中时返回 `false`
    pub fn set_attachment(key: impl Into<String>, value: impl Into<Value>) -> bool {
        let key = key.into();
        let value = value.into();
        ATTACHMENTS
            .try_with(|attachments| {
                attachments.lock().insert(key, value);
            })
            .is_ok()
    }

    pub fn attachment(key: &str) -> Option<Value> {
        ATTACHMENTS
            .try_with(|attachments| attachments.lock().get(key).cloned())
            .ok()
            .flatten()
    }

    pub fn attachments() -> HashMap<String, Value> {
        ATTACHMENTS
            .try_with(|attachments| attachments.lock().clone())
            .unwrap_or_default()
    }
}

/// 一次远程调用的上下文
#[derive(Debug, Clone, Default)]
pub struct RemoteInvokeContext {
    pub message: RemoteInvokeMessage,
    /// 路由提示（例如一致性哈希的键）
    pub routing_hint: Option<String>,
}

impl RemoteInvokeContext {
    pub fn new(message: RemoteInvokeMessage) -> Self {
        Self {
            message,
            routing_hint: None,
        }
    }

    pub fn with_routing_hint(mut self, hint: impl Into<String>) -> Self {
        self.routing_hint = Some(hint.into());
        self
    }
}
