//! 内存协调存储（用于测试和单进程嵌入）

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::oneshot;

use super::{parent_path, CoordinationStore, Watch, WatchedEvent, WatchedEventKind};
use crate::error::{FlareError, Result};

#[derive(Default)]
struct Inner {
    nodes: BTreeMap<String, Vec<u8>>,
    data_watches: HashMap<String, Vec<oneshot::Sender<WatchedEvent>>>,
    child_watches: HashMap<String, Vec<oneshot::Sender<WatchedEvent>>>,
}

impl Inner {
    fn contains(&self, path: &str) -> bool {
        path == "/" || self.nodes.contains_key(path)
    }

    fn children_of(&self, path: &str) -> Vec<String> {
        let prefix = if path == "/" {
            "/".to_string()
        } else {
            format!("{}/", path)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, _)| {
                let rest = &key[prefix.len()..];
                (!rest.is_empty() && !rest.contains('/')).then(|| rest.to_string())
            })
            .collect()
    }

    fn take_data_watches(&mut self, path: &str) -> Vec<oneshot::Sender<WatchedEvent>> {
        self.data_watches.remove(path).unwrap_or_default()
    }

    fn take_child_watches(&mut self, path: &str) -> Vec<oneshot::Sender<WatchedEvent>> {
        self.child_watches.remove(path).unwrap_or_default()
    }
}

/// 内存协调存储
///
/// 节点按路径保存在有序表中，根节点 `/` 隐式存在。
/// watch 语义与 ZooKeeper 一致：每个 watch 只触发一次。
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
    writes: Arc<AtomicU64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 成功执行的写操作次数（create / set_data / delete）
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// 当前节点数量（不含根节点）
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }

    /// 尚未触发的 watch 数量
    pub fn pending_watch_count(&self) -> usize {
        let inner = self.inner.lock();
        inner.data_watches.values().map(Vec::len).sum::<usize>()
            + inner.child_watches.values().map(Vec::len).sum::<usize>()
    }
}

fn normalize(path: &str) -> Result<String> {
    if !path.starts_with('/') {
        return Err(FlareError::invalid_parameter(format!(
            "Path must be absolute: {}",
            path
        )));
    }
    let trimmed = path.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

fn fire(watches: Vec<oneshot::Sender<WatchedEvent>>, path: &str, kind: WatchedEventKind) {
    for watch in watches {
        let _ = watch.send(WatchedEvent {
            path: path.to_string(),
            kind,
        });
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn exists(&self, path: &str) -> Result<bool> {
        let path = normalize(path)?;
        Ok(self.inner.lock().contains(&path))
    }

    async fn get_children(&self, path: &str) -> Result<Vec<String>> {
        let path = normalize(path)?;
        let inner = self.inner.lock();
        if !inner.contains(&path) {
            return Err(FlareError::node_not_found(&path));
        }
        Ok(inner.children_of(&path))
    }

    async fn get_data(&self, path: &str) -> Result<Vec<u8>> {
        let path = normalize(path)?;
        let inner = self.inner.lock();
        if path == "/" {
            return Ok(Vec::new());
        }
        inner
            .nodes
            .get(&path)
            .cloned()
            .ok_or_else(|| FlareError::node_not_found(&path))
    }

    async fn create(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = normalize(path)?;
        let (own_data, own_children, parent, parent_children) = {
            let mut inner = self.inner.lock();
            if inner.contains(&path) {
                return Err(FlareError::node_exists(&path));
            }
            let parent = parent_path(&path).unwrap_or("/").to_string();
            if !inner.contains(&parent) {
                return Err(FlareError::node_not_found(&parent));
            }
            inner.nodes.insert(path.clone(), data);
            (
                inner.take_data_watches(&path),
                inner.take_child_watches(&path),
                parent.clone(),
                inner.take_child_watches(&parent),
            )
        };
        self.writes.fetch_add(1, Ordering::SeqCst);

        fire(own_data, &path, WatchedEventKind::NodeCreated);
        fire(own_children, &path, WatchedEventKind::NodeCreated);
        fire(parent_children, &parent, WatchedEventKind::NodeChildrenChanged);
        Ok(())
    }

    async fn set_data(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let path = normalize(path)?;
        let watches = {
            let mut inner = self.inner.lock();
            match inner.nodes.get_mut(&path) {
                Some(slot) => *slot = data,
                None => return Err(FlareError::node_not_found(&path)),
            }
            inner.take_data_watches(&path)
        };
        self.writes.fetch_add(1, Ordering::SeqCst);

        fire(watches, &path, WatchedEventKind::NodeDataChanged);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let path = normalize(path)?;
        let (own_data, own_children, parent, parent_children) = {
            let mut inner = self.inner.lock();
            if !inner.nodes.contains_key(&path) {
                return Err(FlareError::node_not_found(&path));
            }
            if !inner.children_of(&path).is_empty() {
                return Err(FlareError::node_not_empty(&path));
            }
            inner.nodes.remove(&path);
            let parent = parent_path(&path).unwrap_or("/").to_string();
            (
                inner.take_data_watches(&path),
                inner.take_child_watches(&path),
                parent.clone(),
                inner.take_child_watches(&parent),
            )
        };
        self.writes.fetch_add(1, Ordering::SeqCst);

        fire(own_data, &path, WatchedEventKind::NodeDeleted);
        fire(own_children, &path, WatchedEventKind::NodeDeleted);
        fire(parent_children, &parent, WatchedEventKind::NodeChildrenChanged);
        Ok(())
    }

    async fn watch_children(&self, path: &str) -> Result<Watch> {
        let path = normalize(path)?;
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let watches = inner.child_watches.entry(path).or_default();
        watches.retain(|w| !w.is_closed());
        watches.push(tx);
        Ok(rx)
    }

    async fn watch_data(&self, path: &str) -> Result<Watch> {
        let path = normalize(path)?;
        let (tx, rx) = oneshot::channel();
        let mut inner = self.inner.lock();
        let watches = inner.data_watches.entry(path).or_default();
        watches.retain(|w| !w.is_closed());
        watches.push(tx);
        Ok(rx)
    }
}
