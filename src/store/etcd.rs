//! etcd 协调存储
//!
//! etcd 的键空间是扁平的，这里以完整路径作为键模拟层级节点：
//! 子节点即前缀为 `<path>/` 且不含更多分隔符的键。

use async_trait::async_trait;
use etcd_client::{
    Client, Compare, CompareOp, EventType, GetOptions, Txn, TxnOp, WatchOptions,
};
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};

use super::{parent_path, CoordinationStore, Watch, WatchedEvent, WatchedEventKind};
use crate::error::{FlareError, Result};

/// etcd 协调存储
pub struct EtcdStore {
    client: Arc<Mutex<Client>>,
}

impl EtcdStore {
    /// 连接 etcd 集群
    pub async fn connect(endpoints: &[String]) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(FlareError::configuration_error(
                "etcd endpoints not configured",
            ));
        }
        let client = Client::connect(endpoints, None).await?;
        tracing::info!(endpoints = ?endpoints, "Connected to etcd");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
        })
    }

    async fn client(&self) -> Client {
        self.client.lock().await.clone()
    }

    fn child_prefix(path: &str) -> String {
        if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        }
    }

    async fn key_exists(client: &mut Client, path: &str) -> Result<bool> {
        if path == "/" {
            return Ok(true);
        }
        let resp = client
            .get(path, Some(GetOptions::new().with_keys_only()))
            .await?;
        Ok(!resp.kvs().is_empty())
    }

    async fn direct_children(client: &mut Client, path: &str) -> Result<Vec<String>> {
        let prefix = Self::child_prefix(path);
        let resp = client
            .get(
                prefix.as_str(),
                Some(GetOptions::new().with_prefix().with_keys_only()),
            )
            .await?;
        let mut children = Vec::new();
        for kv in resp.kvs() {
            let key = kv.key_str()?;
            let rest = &key[prefix.len()..];
            if !rest.is_empty() && !rest.contains('/') {
                children.push(rest.to_string());
            }
        }
        Ok(children)
    }

    /// 启动一个后台任务等待第一个匹配的事件，然后取消 watch
    async fn arm<F>(&self, key: String, prefix: bool, classify: F) -> Result<Watch>
    where
        F: Fn(&str, EventType, i64) -> Option<WatchedEvent> + Send + 'static,
    {
        let mut client = self.client().await;
        let options = if prefix {
            WatchOptions::new().with_prefix()
        } else {
            WatchOptions::new()
        };
        let (mut watcher, mut stream) = client.watch(key.as_str(), Some(options)).await?;
        let (tx, rx) = oneshot::channel();

        tokio::spawn(async move {
            let mut tx = tx;
            let mut fired = None;
            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    message = stream.message() => {
                        let resp = match message {
                            Ok(Some(resp)) => resp,
                            Ok(None) => break,
                            Err(e) => {
                                tracing::warn!(key = %key, error = %e, "etcd watch stream failed");
                                break;
                            }
                        };
                        fired = resp.events().iter().find_map(|event| {
                            let kv = event.kv()?;
                            let changed = kv.key_str().ok()?;
                            classify(changed, event.event_type(), kv.version())
                        });
                        if fired.is_some() {
                            break;
                        }
                    }
                }
            }
            if let Some(event) = fired {
                let _ = tx.send(event);
            }
            let _ = watcher.cancel().await;
        });

        Ok(rx)
    }
}

#[async_trait]
impl CoordinationStore for EtcdStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let mut client = self.client().await;
        Self::key_exists(&mut client, path).await
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let mut client = self.client().await;
        if !Self::key_exists(&mut client, path).await? {
            return Err(FlareError::node_not_found(path));
        }
        Self::direct_children(&mut client, path).await
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let mut client = self.client().await;
        let resp = client.get(path, None).await?;
        resp.kvs()
            .first()
            .map(|kv| kv.value().to_vec())
            .ok_or_else(|| FlareError::node_not_found(path))
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let mut client = self.client().await;
        if let Some(parent) = parent_path(path) {
            if !Self::key_exists(&mut client, parent).await? {
                return Err(FlareError::node_not_found(parent));
            }
        }
        let txn = Txn::new()
            .when(vec![Compare::create_revision(path, CompareOp::Equal, 0)])
            .and_then(vec![TxnOp::put(path, data, None)]);
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(FlareError::node_exists(path));
        }
        Ok(())
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let mut client = self.client().await;
        let txn = Txn::new()
            .when(vec![Compare::version(path, CompareOp::Greater, 0)])
            .and_then(vec![TxnOp::put(path, data, None)]);
        let resp = client.txn(txn).await?;
        if !resp.succeeded() {
            return Err(FlareError::node_not_found(path));
        }
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut client = self.client().await;
        if !Self::direct_children(&mut client, path).await?.is_empty() {
            return Err(FlareError::node_not_empty(path));
        }
        let resp = client.delete(path, None).await?;
        if resp.deleted() == 0 {
            return Err(FlareError::node_not_found(path));
        }
        Ok(())
    }

    async fn watch_children(&self, path: &str) -> Result<Watch> {
        // 前缀 watch 同时覆盖节点自身和所有后代，只关心直接子节点的增删
        let own = path.to_string();
        let prefix = Self::child_prefix(path);
        let watch_key = own.trim_end_matches('/').to_string();
        self.arm(watch_key, true, move |key, kind, version| {
            if key == own {
                return match kind {
                    EventType::Delete => Some(WatchedEvent {
                        path: own.clone(),
                        kind: WatchedEventKind::NodeDeleted,
                    }),
                    EventType::Put if version == 1 => Some(WatchedEvent {
                        path: own.clone(),
                        kind: WatchedEventKind::NodeCreated,
                    }),
                    EventType::Put => None,
                };
            }
            let rest = key.strip_prefix(prefix.as_str())?;
            if rest.is_empty() || rest.contains('/') {
                return None;
            }
            match kind {
                EventType::Delete => Some(()),
                EventType::Put if version == 1 => Some(()),
                EventType::Put => None,
            }
            .map(|_| WatchedEvent {
                path: own.clone(),
                kind: WatchedEventKind::NodeChildrenChanged,
            })
        })
        .await
    }

    async fn watch_data(&self, path: &str) -> Result<Watch> {
        let own = path.to_string();
        self.arm(own.clone(), false, move |_, kind, version| {
            let kind = match kind {
                EventType::Delete => WatchedEventKind::NodeDeleted,
                EventType::Put if version == 1 => WatchedEventKind::NodeCreated,
                EventType::Put => WatchedEventKind::NodeDataChanged,
            };
            Some(WatchedEvent {
                path: own.clone(),
                kind,
            })
        })
        .await
    }
}
