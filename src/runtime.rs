//! 路由运行时
//!
//! 按配置组装协调存储、路由注册中心、健康监控和远程调用服务，并统一管理它们的生命周期。
//!
//! ```rust,no_run
//! use flare_rpc_routing::{Config, RoutingRuntime};
//! # async fn run(factory: std::sync::Arc<dyn flare_rpc_routing::TransportClientFactory>) -> flare_rpc_routing::Result<()> {
//! let config = Config::load_from_file("routing.toml")?;
//! let runtime = RoutingRuntime::start(config, factory).await?;
//! // runtime.invoker().invoke(..)
//! runtime.shutdown();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use crate::client::{DefaultAddressResolver, RemoteInvokeService, TransportClientFactory};
use crate::config::Config;
use crate::error::Result;
use crate::health::HealthCheckService;
use crate::registry::ServiceRouteManager;
use crate::store::{self, CoordinationStore};

/// 已启动的路由组件集合
pub struct RoutingRuntime {
    store: Arc<dyn CoordinationStore>,
    registry: Arc<ServiceRouteManager>,
    health: Arc<HealthCheckService>,
    invoker: Arc<RemoteInvokeService>,
}

impl RoutingRuntime {
    /// 连接配置的存储并启动全部组件
    pub async fn start(config: Config, factory: Arc<dyn TransportClientFactory>) -> Result<Self> {
        let store = store::connect(&config.registry.store).await?;
        let health = HealthCheckService::with_default_prober(config.health_check.clone());
        Self::start_with(config, store, health, factory).await
    }

    /// 使用给定的存储和健康监控启动
    pub async fn start_with(
        config: Config,
        store: Arc<dyn CoordinationStore>,
        health: Arc<HealthCheckService>,
        factory: Arc<dyn TransportClientFactory>,
    ) -> Result<Self> {
        let registry = ServiceRouteManager::new(store.clone(), &config.registry);
        health.attach(&registry, config.registry.local_address.clone());
        registry.start().await?;
        health.start();

        let resolver = Arc::new(DefaultAddressResolver::new(
            registry.clone(),
            health.clone(),
            config.invoker.load_balance,
        ));
        let invoker = Arc::new(RemoteInvokeService::new(
            resolver,
            factory,
            health.clone(),
            &config.invoker,
        ));

        tracing::info!(
            root = %config.registry.root_path,
            backend = %config.registry.store.backend,
            "Routing runtime started"
        );
        Ok(Self {
            store,
            registry,
            health,
            invoker,
        })
    }

    pub fn store(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ServiceRouteManager> {
        &self.registry
    }

    pub fn health(&self) -> &Arc<HealthCheckService> {
        &self.health
    }

    pub fn invoker(&self) -> &Arc<RemoteInvokeService> {
        &self.invoker
    }

    /// 停止后台探测和 watch 任务
    pub fn shutdown(&self) {
        self.health.stop();
        self.registry.shutdown();
        tracing::info!("Routing runtime stopped");
    }
}
