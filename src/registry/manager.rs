//! 服务路由管理器
//!
//! 维护协调存储中路由的本地快照。根节点下每个服务 id 对应一个子节点，
//! 节点数据为序列化的 [`ServiceRoute`]。
//!
//! 同步基于一次性 watch：根节点的子节点 watch 负责发现新增/删除的路由，
//! 每个路由节点的数据 watch 负责发现地址变化。watch 先重新订阅再读取数据，
//! 保证两次通知之间的变更不会丢失。

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::matcher;
use super::route::{RouteEvent, ServiceRoute};
use super::watcher::NodeWatcher;
use crate::config::RegistryConfig;
use crate::error::{ErrorCode, FlareError, Result};
use crate::event::{EventBus, EventReceiver};
use crate::health::AddressEvictor;
use crate::retry::{retry_with, ExponentialBackoffPolicy, RetryPolicy};
use crate::store::{child_path, CoordinationStore, Watch, WatchedEventKind};
use crate::types::Endpoint;

/// 期望路由数量提示
///
/// 本地快照中的路由少于提示数量时，查询前会先重新同步。
pub trait RouteCountHint: Send + Sync {
    fn expected_route_count(&self) -> usize;
}

/// 服务路由管理器
pub struct ServiceRouteManager {
    this: Weak<ServiceRouteManager>,
    store: Arc<dyn CoordinationStore>,
    root_path: String,
    routes: ArcSwap<Vec<ServiceRoute>>,
    // 最后一次观察到的根节点子节点集合
    children: Mutex<HashSet<String>>,
    node_watchers: DashMap<String, Arc<NodeWatcher>>,
    events: EventBus<RouteEvent>,
    count_hint: Option<Arc<dyn RouteCountHint>>,
    rearm_policy: ExponentialBackoffPolicy,
    cancel: CancellationToken,
}

impl ServiceRouteManager {
    pub fn new(store: Arc<dyn CoordinationStore>, config: &RegistryConfig) -> Arc<Self> {
        Self::build(store, config, None)
    }

    pub fn with_route_count_hint(
        store: Arc<dyn CoordinationStore>,
        config: &RegistryConfig,
        hint: Arc<dyn RouteCountHint>,
    ) -> Arc<Self> {
        Self::build(store, config, Some(hint))
    }

    fn build(
        store: Arc<dyn CoordinationStore>,
        config: &RegistryConfig,
        count_hint: Option<Arc<dyn RouteCountHint>>,
    ) -> Arc<Self> {
        let root_path = match config.root_path.trim_end_matches('/') {
            "" => "/".to_string(),
            trimmed => trimmed.to_string(),
        };
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            store,
            root_path,
            routes: ArcSwap::from_pointee(Vec::new()),
            children: Mutex::new(HashSet::new()),
            node_watchers: DashMap::new(),
            events: EventBus::new(config.event_capacity),
            count_hint,
            rearm_policy: ExponentialBackoffPolicy::unbounded(
                Duration::from_millis(100),
                Duration::from_secs(30),
            ),
            cancel: CancellationToken::new(),
        })
    }

    pub fn root_path(&self) -> &str {
        &self.root_path
    }

    /// 订阅路由变更事件
    pub fn subscribe(&self) -> EventReceiver<RouteEvent> {
        self.events.subscribe()
    }

    /// 初始同步并开始监听根节点的子节点变化
    pub async fn start(&self) -> Result<()> {
        let watch = self.store.watch_children(&self.root_path).await?;
        self.sync_children().await;
        self.spawn_children_watch(watch);
        tracing::info!(root = %self.root_path, routes = self.routes.load().len(), "Service route manager started");
        Ok(())
    }

    /// 停止所有 watch 任务
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.node_watchers.clear();
    }

    /// 获取全部路由
    ///
    /// 快照为空、强制刷新或快照少于期望数量时先从存储重新同步。
    pub async fn get_routes(&self, force_refresh: bool) -> Vec<ServiceRoute> {
        if force_refresh || self.is_stale() {
            self.resync().await;
        }
        self.routes.load().as_ref().clone()
    }

    /// 按服务 id 查找路由，未命中时强制同步后再试一次
    pub async fn get_route_by_service_id(&self, service_id: &str) -> Option<ServiceRoute> {
        let routes = self.get_routes(false).await;
        if let Some(route) = routes.iter().find(|r| r.id() == service_id) {
            return Some(route.clone());
        }
        self.get_routes(true)
            .await
            .into_iter()
            .find(|r| r.id() == service_id)
    }

    /// 按请求路径查找路由：精确匹配优先，其次模板匹配
    pub async fn get_route_by_path(&self, path: &str) -> Option<ServiceRoute> {
        let routes = self.get_routes(false).await;
        if let Some(route) = matcher::find_by_path(&routes, path) {
            return Some(route.clone());
        }
        let routes = self.get_routes(true).await;
        let found = matcher::find_by_path(&routes, path).cloned();
        if found.is_none() {
            tracing::warn!(path = %path, "No service route matches path");
        }
        found
    }

    /// 注册路由
    ///
    /// 与存储中已有的同 id 路由合并：描述以新值为准，地址追加。
    /// 数据与存储中完全相同时不写入。
    pub async fn set_routes(&self, routes: Vec<ServiceRoute>) -> Result<()> {
        for route in &routes {
            validate_id(route.id())?;
        }
        self.ensure_root().await?;

        for incoming in routes {
            let id = incoming.id().to_string();
            let path = child_path(&self.root_path, &id);
            let stored = self.read_node(&path).await?;
            let merged = match stored.as_deref().map(ServiceRoute::decode) {
                Some(Ok(existing)) => existing.merge(incoming),
                Some(Err(e)) => {
                    tracing::warn!(service_id = %id, error = %e, "Stored route is unreadable, overwriting");
                    ServiceRoute::new(incoming.descriptor, incoming.addresses)
                }
                None => ServiceRoute::new(incoming.descriptor, incoming.addresses),
            };
            let bytes = merged.encode()?;
            self.write_node(&path, stored.as_deref(), &bytes).await?;
            self.observe_local(&id, &bytes).await;
        }
        Ok(())
    }

    pub async fn set_route(&self, route: ServiceRoute) -> Result<()> {
        self.set_routes(vec![route]).await
    }

    /// 从所有路由中移除给定地址并持久化
    pub async fn remove_addresses(&self, addresses: &[Endpoint]) -> Result<()> {
        if addresses.is_empty() {
            return Ok(());
        }
        let routes = self.get_routes(false).await;
        for route in routes {
            if route.without(addresses).is_none() {
                continue;
            }
            let path = child_path(&self.root_path, route.id());
            let Some(stored) = self.read_node(&path).await? else {
                continue;
            };
            let current = ServiceRoute::decode(&stored)?;
            let Some(updated) = current.without(addresses) else {
                continue;
            };
            let bytes = updated.encode()?;
            self.write_node(&path, Some(&stored), &bytes).await?;
            tracing::info!(
                service_id = %route.id(),
                removed = ?addresses.iter().map(ToString::to_string).collect::<Vec<_>>(),
                remaining = updated.addresses.len(),
                "Removed addresses from service route"
            );
            self.observe_local(route.id(), &bytes).await;
        }
        Ok(())
    }

    /// 删除根节点下的所有节点（先深后浅），最后删除根节点
    pub async fn clear(&self) -> Result<()> {
        if self.store.exists(&self.root_path).await? {
            self.delete_tree(self.root_path.clone()).await?;
        }
        self.apply_children(HashSet::new()).await;
        tracing::info!(root = %self.root_path, "Cleared service routes");
        Ok(())
    }

    fn is_stale(&self) -> bool {
        let cached = self.routes.load().len();
        cached == 0
            || self
                .count_hint
                .as_ref()
                .is_some_and(|hint| hint.expected_route_count() > cached)
    }

    fn delete_tree(&self, path: String) -> futures::future::BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            let children = match self.store.get_children(&path).await {
                Ok(children) => children,
                Err(e) if e.is_node_not_found() => return Ok(()),
                Err(e) => return Err(e),
            };
            for child in children {
                self.delete_tree(child_path(&path, &child)).await?;
            }
            if path == "/" {
                return Ok(());
            }
            match self.store.delete(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.is_node_not_found() => Ok(()),
                Err(e) => Err(e),
            }
        })
    }

    /// 逐段创建根路径
    async fn ensure_root(&self) -> Result<()> {
        let mut current = String::new();
        for segment in self.root_path.split('/').filter(|s| !s.is_empty()) {
            current.push('/');
            current.push_str(segment);
            if self.store.exists(&current).await? {
                continue;
            }
            match self.store.create(&current, Vec::new()).await {
                Ok(()) => tracing::debug!(path = %current, "Created route directory"),
                Err(e) if e.code() == Some(ErrorCode::NodeExists) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn read_node(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match self.store.get_data(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.is_node_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write_node(&self, path: &str, stored: Option<&[u8]>, bytes: &[u8]) -> Result<()> {
        match stored {
            Some(stored) if stored == bytes => {
                tracing::debug!(path = %path, "Route unchanged, skipping write");
                Ok(())
            }
            Some(_) => self.store.set_data(path, bytes.to_vec()).await,
            None => match self.store.create(path, bytes.to_vec()).await {
                Err(e) if e.code() == Some(ErrorCode::NodeExists) => {
                    self.store.set_data(path, bytes.to_vec()).await
                }
                other => other,
            },
        }
    }

    /// 重新同步：子节点差异 + 重新读取已知节点
    async fn resync(&self) {
        let Some(children) = self.fetch_children().await else {
            return;
        };
        let known: Vec<String> = {
            let current = self.children.lock().await;
            current.intersection(&children).cloned().collect()
        };
        self.apply_children(children).await;
        for id in known {
            let path = child_path(&self.root_path, &id);
            match self.read_node(&path).await {
                Ok(Some(bytes)) => self.apply_node(&id, &bytes),
                Ok(None) => {}
                Err(e) => tracing::warn!(service_id = %id, error = %e, "Failed to read route node"),
            }
        }
    }

    async fn sync_children(&self) {
        if let Some(children) = self.fetch_children().await {
            self.apply_children(children).await;
        }
    }

    async fn fetch_children(&self) -> Option<HashSet<String>> {
        match self.store.get_children(&self.root_path).await {
            Ok(children) => Some(children.into_iter().collect()),
            Err(e) if e.is_node_not_found() => {
                tracing::debug!(root = %self.root_path, "Route root does not exist");
                Some(HashSet::new())
            }
            Err(e) => {
                tracing::warn!(root = %self.root_path, error = %e, "Failed to list route nodes");
                None
            }
        }
    }

    /// 子节点差异：移除消失的路由，加载新增的路由，一次性替换快照
    async fn apply_children(&self, children: HashSet<String>) {
        let (removed, added) = {
            let mut current = self.children.lock().await;
            let removed: HashSet<String> = current.difference(&children).cloned().collect();
            // 已知但失去数据 watch 的路由按新增处理，重新加载并订阅
            let added: Vec<String> = children
                .iter()
                .filter(|id| !current.contains(*id) || !self.node_watchers.contains_key(*id))
                .cloned()
                .collect();
            *current = children;
            (removed, added)
        };
        if removed.is_empty() && added.is_empty() {
            return;
        }

        for id in &removed {
            if let Some((_, watcher)) = self.node_watchers.remove(id) {
                watcher.stop();
            }
        }

        let mut loaded = Vec::with_capacity(added.len());
        for id in &added {
            if let Some(route) = self.load_route(id).await {
                loaded.push(route);
            }
        }

        let previous = self.routes.rcu(|current| {
            current
                .iter()
                .filter(|r| {
                    !removed.contains(r.id()) && !loaded.iter().any(|l| l.id() == r.id())
                })
                .cloned()
                .chain(loaded.iter().cloned())
                .collect::<Vec<_>>()
        });

        for route in previous.iter().filter(|r| removed.contains(r.id())) {
            tracing::info!(service_id = %route.id(), "Service route removed");
            self.events.publish(RouteEvent::Removed(route.clone()));
        }
        for route in loaded {
            match previous.iter().find(|r| r.id() == route.id()) {
                Some(old) if *old == route => {}
                Some(old) => self.events.publish(RouteEvent::Changed {
                    route,
                    previous: old.clone(),
                }),
                None => {
                    tracing::info!(service_id = %route.id(), addresses = route.addresses.len(), "Service route created");
                    self.events.publish(RouteEvent::Created(route));
                }
            }
        }
    }

    /// 读取新增路由节点并开始监听；空地址路由不进入快照
    async fn load_route(&self, id: &str) -> Option<ServiceRoute> {
        let watcher = self.node_watcher(id);
        let bytes = match self.read_node(&watcher.path).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(service_id = %id, error = %e, "Failed to read route node");
                return None;
            }
        };
        watcher.observe(&bytes);
        match ServiceRoute::decode(&bytes) {
            Ok(route) if route.addresses.is_empty() => None,
            Ok(route) => Some(route),
            Err(e) => {
                tracing::warn!(service_id = %id, error = %e, "Failed to decode route node");
                None
            }
        }
    }

    /// 节点差异：非空地址替换路由，空地址移除路由
    fn apply_node(&self, id: &str, bytes: &[u8]) {
        if let Some(watcher) = self.node_watchers.get(id).map(|w| w.clone()) {
            if !watcher.observe(bytes) {
                return;
            }
        }
        let route = match ServiceRoute::decode(bytes) {
            Ok(route) => route,
            Err(e) => {
                tracing::warn!(service_id = %id, error = %e, "Failed to decode route node");
                return;
            }
        };
        let replacement = (!route.addresses.is_empty()).then_some(route);

        let previous = self.routes.rcu(|current| {
            let mut next = current.as_ref().clone();
            let position = next.iter().position(|r| r.id() == id);
            match (position, &replacement) {
                (Some(i), Some(route)) => next[i] = route.clone(),
                (Some(i), None) => {
                    next.remove(i);
                }
                (None, Some(route)) => next.push(route.clone()),
                (None, None) => {}
            }
            next
        });
        let previous = previous.iter().find(|r| r.id() == id).cloned();

        match (replacement, previous) {
            (Some(route), Some(previous)) if route == previous => {}
            (Some(route), Some(previous)) => {
                tracing::debug!(service_id = %id, addresses = route.addresses.len(), "Service route changed");
                self.events.publish(RouteEvent::Changed { route, previous });
            }
            (Some(route), None) => self.events.publish(RouteEvent::Created(route)),
            (None, Some(previous)) => {
                tracing::info!(service_id = %id, "Service route has no addresses, removed");
                self.events.publish(RouteEvent::Removed(previous));
            }
            (None, None) => {}
        }
    }

    /// 本地写入后直接走 watch 路径，使快照立即反映写入结果
    async fn observe_local(&self, id: &str, bytes: &[u8]) {
        let is_new = self.children.lock().await.insert(id.to_string());
        if is_new {
            self.node_watcher(id);
        }
        self.apply_node(id, bytes);
    }

    fn node_watcher(&self, id: &str) -> Arc<NodeWatcher> {
        let mut created = false;
        let watcher = self
            .node_watchers
            .entry(id.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(NodeWatcher::new(
                    id.to_string(),
                    child_path(&self.root_path, id),
                    self.cancel.child_token(),
                ))
            })
            .clone();
        if created {
            self.spawn_node_watch(watcher.clone());
        }
        watcher
    }

    fn spawn_children_watch(&self, first: Watch) {
        let this = self.this.clone();
        let store = self.store.clone();
        let root = self.root_path.clone();
        let policy = self.rearm_policy.clone();
        let cancel = self.cancel.clone();

        tokio::spawn(async move {
            let mut watch = first;
            let mut failures = 0usize;
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = &mut watch => event,
                };
                if !settle(&policy, &cancel, event.is_ok(), &mut failures).await {
                    break;
                }
                watch = match retry_with(&policy, &cancel, || store.watch_children(&root)).await {
                    Ok(watch) => watch,
                    Err(_) => break,
                };
                let Some(manager) = this.upgrade() else { break };
                manager.sync_children().await;
            }
            tracing::debug!(root = %root, "Children watch stopped");
        });
    }

    /// 路由节点的数据 watch，节点被删除后保持订阅，直到路由从子节点集合中移除
    fn spawn_node_watch(&self, watcher: Arc<NodeWatcher>) {
        let this = self.this.clone();
        let store = self.store.clone();
        let policy = self.rearm_policy.clone();

        tokio::spawn(async move {
            let cancel = watcher.cancelled().clone();
            let mut failures = 0usize;
            loop {
                let watch = match retry_with(&policy, &cancel, || store.watch_data(&watcher.path)).await {
                    Ok(watch) => watch,
                    Err(_) => break,
                };
                {
                    let Some(manager) = this.upgrade() else { break };
                    match manager.read_node(&watcher.path).await {
                        Ok(Some(bytes)) => manager.apply_node(&watcher.id, &bytes),
                        Ok(None) => {
                            tracing::debug!(path = %watcher.path, "Route node absent, waiting for recreation")
                        }
                        Err(e) => tracing::warn!(path = %watcher.path, error = %e, "Failed to read route node"),
                    }
                }
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = watch => event,
                };
                if let Ok(event) = &event {
                    if event.kind == WatchedEventKind::NodeDeleted {
                        tracing::debug!(path = %watcher.path, "Route node deleted");
                    }
                }
                if !settle(&policy, &cancel, event.is_ok(), &mut failures).await {
                    break;
                }
            }
            if let Some(manager) = this.upgrade() {
                manager
                    .node_watchers
                    .remove_if(&watcher.id, |_, current| Arc::ptr_eq(current, &watcher));
            }
            tracing::debug!(path = %watcher.path, "Node watch stopped");
        });
    }
}

/// watch 通知被存储端丢弃时按退避策略等待后再重新订阅
///
/// 返回 `false` 表示等待期间被取消。
async fn settle(
    policy: &ExponentialBackoffPolicy,
    cancel: &CancellationToken,
    delivered: bool,
    failures: &mut usize,
) -> bool {
    if delivered {
        *failures = 0;
        return true;
    }
    *failures = failures.saturating_add(1);
    let delay = policy.backoff_duration(*failures);
    tracing::warn!(attempt = *failures, delay_ms = delay.as_millis() as u64, "Watch dropped by store, re-arming after backoff");
    tokio::select! {
        _ = cancel.cancelled() => false,
        _ = tokio::time::sleep(delay) => true,
    }
}

impl Drop for ServiceRouteManager {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains('/') {
        return Err(FlareError::invalid_parameter(format!(
            "Invalid service id: {:?}",
            id
        )));
    }
    Ok(())
}

#[async_trait]
impl AddressEvictor for ServiceRouteManager {
    async fn evict(&self, addresses: &[Endpoint]) -> Result<()> {
        self.remove_addresses(addresses).await
    }
}
