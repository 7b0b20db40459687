//! 地址健康监控模块
//!
//! 按地址维护健康状态表：后台周期探测、调用失败上报、超过阈值的地址从路由中剔除。

mod entry;
mod probe;

pub use entry::{MonitorSnapshot, ProbeOutcome};
pub use probe::{DefaultProber, Prober};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use self::entry::MonitorEntry;
use crate::config::HealthCheckConfig;
use crate::error::Result;
use crate::event::{EventBus, EventReceiver, RecvError};
use crate::registry::{RouteEvent, ServiceRouteManager};
use crate::types::Endpoint;

/// 地址剔除接口，由路由注册中心实现
#[async_trait]
pub trait AddressEvictor: Send + Sync {
    async fn evict(&self, addresses: &[Endpoint]) -> Result<()>;
}

/// 健康事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthEvent {
    Changed { endpoint: Endpoint, healthy: bool },
    Removed { endpoint: Endpoint },
}

/// 健康检查服务
pub struct HealthCheckService {
    this: Weak<HealthCheckService>,
    config: HealthCheckConfig,
    entries: DashMap<Endpoint, Arc<MonitorEntry>>,
    prober: Arc<dyn Prober>,
    evictor: RwLock<Option<Arc<dyn AddressEvictor>>>,
    events: EventBus<HealthEvent>,
    sweep: Mutex<Option<CancellationToken>>,
    shutdown: CancellationToken,
}

impl HealthCheckService {
    pub fn new(config: HealthCheckConfig, prober: Arc<dyn Prober>) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            entries: DashMap::new(),
            prober,
            evictor: RwLock::new(None),
            events: EventBus::new(256),
            sweep: Mutex::new(None),
            shutdown: CancellationToken::new(),
        })
    }

    /// 使用默认探测器创建
    pub fn with_default_prober(config: HealthCheckConfig) -> Arc<Self> {
        let prober = DefaultProber::new(config.reachability, config.timeout());
        Self::new(config, Arc::new(prober))
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    pub fn set_evictor(&self, evictor: Arc<dyn AddressEvictor>) {
        *self.evictor.write() = Some(evictor);
    }

    /// 订阅健康事件
    pub fn subscribe(&self) -> EventReceiver<HealthEvent> {
        self.events.subscribe()
    }

    /// 开始监控地址，新建的条目在返回前完成首次探测
    pub async fn monitor(&self, endpoint: &Endpoint) {
        let entry = self.ensure_entry(endpoint).await;
        self.publish_changed(endpoint, entry.is_healthy());
    }

    /// 查询地址是否健康
    ///
    /// 条目不存在时先创建并探测。两个计数都达到阈值的地址会被立即剔除。
    pub async fn is_healthy(&self, endpoint: &Endpoint) -> bool {
        let entry = self.ensure_entry(endpoint).await;
        let healthy = if self.should_evict(&entry) {
            self.evict(vec![entry]).await;
            false
        } else {
            entry.is_healthy()
        };
        self.publish_changed(endpoint, healthy);
        healthy
    }

    /// 上报通信失败
    pub fn mark_failure(&self, endpoint: &Endpoint) {
        let entry = self.reported_entry(endpoint);
        entry.mark_failure();
        tracing::debug!(endpoint = %endpoint, "Marked endpoint failure");
    }

    /// 上报调用超时
    pub fn mark_failure_for_timeout(&self, endpoint: &Endpoint) {
        let entry = self.reported_entry(endpoint);
        entry.mark_timeout(Utc::now());
        tracing::debug!(endpoint = %endpoint, "Marked endpoint timeout");
    }

    pub fn snapshot(&self, endpoint: &Endpoint) -> Option<MonitorSnapshot> {
        self.entries.get(endpoint).map(|entry| entry.snapshot())
    }

    /// 当前监控的全部地址
    pub fn endpoints(&self) -> Vec<Endpoint> {
        let mut endpoints: Vec<Endpoint> = self.entries.iter().map(|e| e.key().clone()).collect();
        endpoints.sort();
        endpoints
    }

    /// 覆盖最后一次超时时间，供运维修正和测试使用
    #[doc(hidden)]
    pub fn set_last_timeout_at(&self, endpoint: &Endpoint, at: Option<DateTime<Utc>>) -> bool {
        match self.entries.get(endpoint) {
            Some(entry) => {
                entry.set_last_timeout_at(at);
                true
            }
            None => false,
        }
    }

    /// 立即执行一轮探测，并剔除超过阈值的地址
    pub async fn check_all(&self) {
        let entries: Vec<Arc<MonitorEntry>> =
            self.entries.iter().map(|e| e.value().clone()).collect();
        if entries.is_empty() {
            return;
        }

        let limit = self.config.timeout();
        let prober = self.prober.as_ref();
        join_all(entries.iter().map(|entry| async move {
            let before = entry.is_healthy();
            let outcome = probe::probe(prober, entry.endpoint(), limit).await;
            entry.record_probe(outcome, Utc::now());
            let after = entry.is_healthy();
            if before != after {
                self.publish_changed(entry.endpoint(), after);
            }
        }))
        .await;

        let unhealthy: Vec<Arc<MonitorEntry>> = entries
            .into_iter()
            .filter(|entry| self.should_evict(entry))
            .collect();
        if !unhealthy.is_empty() {
            self.evict(unhealthy).await;
        }
    }

    /// 启动后台探测循环
    pub fn start(&self) {
        let mut sweep = self.sweep.lock();
        if sweep.is_some() {
            return;
        }
        let token = self.shutdown.child_token();
        *sweep = Some(token.clone());

        let this = self.this.clone();
        let period = self.config.interval();
        tracing::info!(interval_secs = period.as_secs(), "Starting health check loop");

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // 第一次 tick 立即完成
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let Some(service) = this.upgrade() else { break };
                service.check_all().await;
            }
            tracing::info!("Health check loop stopped");
        });
    }

    pub fn stop(&self) {
        if let Some(token) = self.sweep.lock().take() {
            token.cancel();
        }
    }

    /// 订阅路由事件：新建/变更的路由地址加入监控（跳过本机地址），删除的路由移除监控
    pub fn attach(&self, registry: &Arc<ServiceRouteManager>, local_address: Option<Endpoint>) {
        self.set_evictor(registry.clone());

        let mut events = registry.subscribe();
        let this = self.this.clone();
        let cancel = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Overflowed(skipped)) => {
                        tracing::warn!(skipped, "Health monitor lagged behind route events");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(service) = this.upgrade() else { break };
                service.on_route_event(event, local_address.as_ref()).await;
            }
        });
    }

    async fn on_route_event(&self, event: RouteEvent, local_address: Option<&Endpoint>) {
        match event {
            RouteEvent::Created(route) | RouteEvent::Changed { route, .. } => {
                let targets = route
                    .addresses
                    .iter()
                    .filter(|address| Some(*address) != local_address);
                join_all(targets.map(|address| self.monitor(address))).await;
            }
            RouteEvent::Removed(route) => {
                for address in &route.addresses {
                    self.entries.remove(address);
                }
            }
        }
    }

    /// 获取或创建条目，首次探测对每个条目只执行一次
    async fn ensure_entry(&self, endpoint: &Endpoint) -> Arc<MonitorEntry> {
        let entry = self
            .entries
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(MonitorEntry::new(endpoint.clone())))
            .clone();
        entry
            .initializer()
            .get_or_init(|| async {
                let outcome = probe::probe(self.prober.as_ref(), endpoint, self.config.timeout()).await;
                entry.record_probe(outcome, Utc::now());
            })
            .await;
        entry
    }

    /// 失败上报使用的条目：不存在时创建，不做首次探测
    fn reported_entry(&self, endpoint: &Endpoint) -> Arc<MonitorEntry> {
        let entry = self
            .entries
            .entry(endpoint.clone())
            .or_insert_with(|| Arc::new(MonitorEntry::new(endpoint.clone())))
            .clone();
        let _ = entry.initializer().set(());
        entry
    }

    fn should_evict(&self, entry: &MonitorEntry) -> bool {
        entry.exceeds(self.config.unhealthy_threshold, self.config.timeout_threshold)
    }

    /// 从监控表中移除条目，通知注册中心剔除地址，并为每个地址发出一次 `Removed`
    async fn evict(&self, entries: Vec<Arc<MonitorEntry>>) {
        let claimed: Vec<Endpoint> = entries
            .iter()
            .filter(|entry| {
                self.entries
                    .remove_if(entry.endpoint(), |_, current| Arc::ptr_eq(current, *entry))
                    .is_some()
            })
            .map(|entry| entry.endpoint().clone())
            .collect();
        if claimed.is_empty() {
            return;
        }

        let evictor = self.evictor.read().clone();
        if let Some(evictor) = evictor {
            if let Err(e) = evictor.evict(&claimed).await {
                tracing::error!(error = %e, "Failed to remove unhealthy addresses from routes");
            }
        }

        for endpoint in claimed {
            tracing::warn!(endpoint = %endpoint, "Removed unhealthy endpoint");
            self.events.publish(HealthEvent::Removed { endpoint });
        }
    }

    fn publish_changed(&self, endpoint: &Endpoint, healthy: bool) {
        self.events.publish(HealthEvent::Changed {
            endpoint: endpoint.clone(),
            healthy,
        });
    }
}

impl Drop for HealthCheckService {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
