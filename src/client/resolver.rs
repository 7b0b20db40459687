//! 地址解析

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;

use super::balancer::LoadBalancer;
use crate::config::LoadBalanceStrategy;
use crate::error::Result;
use crate::health::HealthCheckService;
use crate::registry::ServiceRouteManager;
use crate::types::Endpoint;

/// 地址解析器 trait
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// 为服务选择一个可调用的地址，没有可用地址时返回 `None`
    async fn resolve(&self, service_id: &str, hint: Option<&str>) -> Result<Option<Endpoint>>;
}

/// 默认地址解析器
///
/// 从路由注册中心取得服务地址，过滤掉不健康的地址后交给负载均衡器选择。
pub struct DefaultAddressResolver {
    registry: Arc<ServiceRouteManager>,
    health: Arc<HealthCheckService>,
    balancer: LoadBalancer,
}

impl DefaultAddressResolver {
    pub fn new(
        registry: Arc<ServiceRouteManager>,
        health: Arc<HealthCheckService>,
        strategy: LoadBalanceStrategy,
    ) -> Self {
        Self {
            registry,
            health,
            balancer: LoadBalancer::new(strategy),
        }
    }
}

#[async_trait]
impl AddressResolver for DefaultAddressResolver {
    async fn resolve(&self, service_id: &str, hint: Option<&str>) -> Result<Option<Endpoint>> {
        let Some(route) = self.registry.get_route_by_service_id(service_id).await else {
            tracing::warn!(service_id = %service_id, "No route found for service");
            return Ok(None);
        };

        // is_healthy 会为未监控的地址创建条目并完成首次探测
        let checks = route
            .addresses
            .iter()
            .map(|address| async move { self.health.is_healthy(address).await.then(|| address.clone()) });
        let healthy: Vec<Endpoint> = join_all(checks).await.into_iter().flatten().collect();

        if healthy.is_empty() {
            tracing::warn!(
                service_id = %service_id,
                candidates = route.addresses.len(),
                "No healthy address for service"
            );
            return Ok(None);
        }

        let selected = self.balancer.select(&healthy, hint).cloned();
        if let Some(endpoint) = &selected {
            tracing::debug!(service_id = %service_id, endpoint = %endpoint, "Resolved service address");
        }
        Ok(selected)
    }
}
