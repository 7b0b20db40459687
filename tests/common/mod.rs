//! 测试共用的替身实现

#![allow(dead_code)]

use async_trait::async_trait;
use flare_rpc_routing::client::{
    AddressResolver, RemoteInvokeMessage, RemoteInvokeResultMessage, TransportClient,
    TransportClientFactory, TransportError,
};
use flare_rpc_routing::health::{AddressEvictor, Prober};
use flare_rpc_routing::registry::{ServiceDescriptor, ServiceRoute, ServiceRouteManager};
use flare_rpc_routing::{Endpoint, FlareError, Result};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn ep(s: &str) -> Endpoint {
    s.parse().expect("valid endpoint")
}

pub fn route(id: &str, route_path: &str, addresses: &[&str]) -> ServiceRoute {
    ServiceRoute::new(
        ServiceDescriptor::new(id).with_route_path(route_path),
        addresses.iter().map(|a| ep(a)),
    )
}

pub fn ids(routes: &[ServiceRoute]) -> HashSet<String> {
    routes.iter().map(|r| r.id().to_string()).collect()
}

/// 轮询直到条件成立或超时
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

/// 可编排结果的探测器
#[derive(Default)]
pub struct ScriptedProber {
    unreachable: Mutex<HashSet<Endpoint>>,
    refused: Mutex<HashSet<Endpoint>>,
    delay: Mutex<Option<Duration>>,
    reachability_calls: AtomicUsize,
    connect_calls: AtomicUsize,
}

impl ScriptedProber {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_unreachable(&self, endpoint: &Endpoint, unreachable: bool) {
        let mut set = self.unreachable.lock();
        if unreachable {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    pub fn set_refused(&self, endpoint: &Endpoint, refused: bool) {
        let mut set = self.refused.lock();
        if refused {
            set.insert(endpoint.clone());
        } else {
            set.remove(endpoint);
        }
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    pub fn reachability_calls(&self) -> usize {
        self.reachability_calls.load(Ordering::SeqCst)
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Prober for ScriptedProber {
    async fn reachable(&self, endpoint: &Endpoint) -> bool {
        self.reachability_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        !self.unreachable.lock().contains(endpoint)
    }

    async fn connect(&self, endpoint: &Endpoint, _timeout: Duration) -> Result<()> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if self.refused.lock().contains(endpoint) {
            Err(FlareError::connection_refused(format!("{} refused", endpoint)))
        } else {
            Ok(())
        }
    }
}

/// 记录剔除请求的剔除器
#[derive(Default)]
pub struct RecordingEvictor {
    pub evicted: Mutex<Vec<Endpoint>>,
}

#[async_trait]
impl AddressEvictor for RecordingEvictor {
    async fn evict(&self, addresses: &[Endpoint]) -> Result<()> {
        self.evicted.lock().extend_from_slice(addresses);
        Ok(())
    }
}

/// 直接返回路由第一个地址的解析器（不做健康过滤）
pub struct FirstAddressResolver {
    pub registry: Arc<ServiceRouteManager>,
    pub calls: AtomicUsize,
}

impl FirstAddressResolver {
    pub fn new(registry: Arc<ServiceRouteManager>) -> Arc<Self> {
        Arc::new(Self {
            registry,
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl AddressResolver for FirstAddressResolver {
    async fn resolve(&self, service_id: &str, _hint: Option<&str>) -> Result<Option<Endpoint>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .registry
            .get_route_by_service_id(service_id)
            .await
            .and_then(|route| route.addresses.first().cloned()))
    }
}

/// 传输行为
#[derive(Debug, Clone)]
pub enum Behavior {
    Reply(serde_json::Value),
    Refuse,
    Hang,
    ReportTimeout,
    Fail(String),
}

/// 按地址编排行为的传输工厂
#[derive(Default)]
pub struct ScriptedFactory {
    behaviors: Mutex<HashMap<Endpoint, Behavior>>,
    pub sent: Mutex<Vec<(Endpoint, RemoteInvokeMessage)>>,
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set(&self, endpoint: &Endpoint, behavior: Behavior) {
        self.behaviors.lock().insert(endpoint.clone(), behavior);
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

struct ScriptedClient {
    endpoint: Endpoint,
    behavior: Behavior,
    factory: Arc<ScriptedFactory>,
}

#[async_trait]
impl TransportClient for ScriptedClient {
    async fn send(
        &self,
        message: RemoteInvokeMessage,
        cancel: CancellationToken,
    ) -> std::result::Result<RemoteInvokeResultMessage, TransportError> {
        self.factory
            .sent
            .lock()
            .push((self.endpoint.clone(), message));
        self.factory.tokens.lock().push(cancel.clone());
        match &self.behavior {
            Behavior::Reply(value) => Ok(RemoteInvokeResultMessage::new(value.clone())),
            Behavior::Refuse => Err(TransportError::Communication(format!(
                "connection refused: {}",
                self.endpoint
            ))),
            Behavior::Hang => {
                cancel.cancelled().await;
                Err(TransportError::Other("cancelled".to_string()))
            }
            Behavior::ReportTimeout => Err(TransportError::Timeout),
            Behavior::Fail(reason) => Err(TransportError::Other(reason.clone())),
        }
    }
}

/// 工厂本身需要以 `Arc` 形式交给客户端
pub struct SharedFactory(pub Arc<ScriptedFactory>);

#[async_trait]
impl TransportClientFactory for SharedFactory {
    async fn create_client(&self, endpoint: &Endpoint) -> Result<Arc<dyn TransportClient>> {
        let behavior = self
            .0
            .behaviors
            .lock()
            .get(endpoint)
            .cloned()
            .unwrap_or(Behavior::Reply(serde_json::Value::Null));
        Ok(Arc::new(ScriptedClient {
            endpoint: endpoint.clone(),
            behavior,
            factory: self.0.clone(),
        }))
    }
}
