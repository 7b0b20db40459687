//! 协调存储抽象和实现
//!
//! 层级节点存储（路径以 `/` 分隔），支持一次性 watch：每个 watch 最多触发一次，
//! 调用方必须在处理事件时重新订阅，否则后续变更会丢失。

pub mod memory;

#[cfg(feature = "etcd")]
pub mod etcd;

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::config::StoreConfig;
use crate::error::{FlareError, Result};

pub use memory::MemoryStore;

#[cfg(feature = "etcd")]
pub use etcd::EtcdStore;

/// 节点事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedEventKind {
    NodeCreated,
    NodeDeleted,
    NodeDataChanged,
    NodeChildrenChanged,
}

/// watch 触发时投递的事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchedEvent {
    pub path: String,
    pub kind: WatchedEventKind,
}

/// 一次性 watch
///
/// 发送端被丢弃（例如存储关闭）时接收端返回错误，调用方应视为需要重新订阅。
pub type Watch = oneshot::Receiver<WatchedEvent>;

/// 协调存储 trait
///
/// 节点不存在时 `get_children` / `get_data` / `set_data` / `delete`
/// 返回 `NodeNotFound` 错误，`create` 在节点已存在时返回 `NodeExists`。
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    async fn exists(&self, path: &str) -> Result<bool>;

    /// 获取直接子节点名称（不含父路径）
    async fn get_children(&self, path: &str) -> Result<Vec<String>>;

    async fn get_data(&self, path: &str) -> Result<Vec<u8>>;

    /// 创建持久节点，父节点必须已存在
    async fn create(&self, path: &str, data: Vec<u8>) -> Result<()>;

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// 删除没有子节点的节点
    async fn delete(&self, path: &str) -> Result<()>;

    /// 监听子节点增删，以及节点自身的创建/删除
    async fn watch_children(&self, path: &str) -> Result<Watch>;

    /// 监听节点数据变更，以及节点自身的创建/删除
    async fn watch_data(&self, path: &str) -> Result<Watch>;
}

/// 父路径；根节点返回 `None`
pub fn parent_path(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) if trimmed.len() > 1 => Some("/"),
        Some(0) | None => None,
        Some(idx) => Some(&trimmed[..idx]),
    }
}

/// 拼接子节点路径
pub fn child_path(parent: &str, child: &str) -> String {
    if parent.ends_with('/') {
        format!("{}{}", parent, child)
    } else {
        format!("{}/{}", parent, child)
    }
}

/// 根据配置创建协调存储
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn CoordinationStore>> {
    match config.backend.to_lowercase().as_str() {
        "memory" => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "etcd")]
        "etcd" => Ok(Arc::new(EtcdStore::connect(&config.endpoints).await?)),
        other => Err(FlareError::configuration_error(format!(
            "Unsupported store backend: {}",
            other
        ))),
    }
}
