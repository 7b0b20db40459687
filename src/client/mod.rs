//! 远程调用模块
//!
//! 解析服务地址、发送请求、对失败分类并反馈给健康监控。

pub mod balancer;
pub mod context;
pub mod resolver;
pub mod transport;

pub use balancer::LoadBalancer;
pub use context::{RemoteInvokeContext, RpcContext, REMOTE_ADDRESS};
pub use resolver::{AddressResolver, DefaultAddressResolver};
pub use transport::{
    RemoteInvokeMessage, RemoteInvokeResultMessage, TransportClient, TransportClientFactory,
    TransportError,
};

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::config::InvokerConfig;
use crate::error::{ErrorCode, FlareError, Result};
use crate::health::HealthCheckService;
use crate::types::Endpoint;

/// 远程调用服务
pub struct RemoteInvokeService {
    resolver: Arc<dyn AddressResolver>,
    factory: Arc<dyn TransportClientFactory>,
    health: Arc<HealthCheckService>,
    default_timeout: Duration,
}

impl RemoteInvokeService {
    pub fn new(
        resolver: Arc<dyn AddressResolver>,
        factory: Arc<dyn TransportClientFactory>,
        health: Arc<HealthCheckService>,
        config: &InvokerConfig,
    ) -> Self {
        Self {
            resolver,
            factory,
            health,
            default_timeout: config.default_timeout(),
        }
    }

    /// 发起远程调用，`timeout` 为空时使用默认超时
    pub async fn invoke(
        &self,
        context: RemoteInvokeContext,
        timeout: Option<Duration>,
    ) -> Result<RemoteInvokeResultMessage> {
        self.invoke_with_cancellation(context, timeout, CancellationToken::new())
            .await
    }

    /// 发起可被调用方取消的远程调用
    ///
    /// 通信失败记一次失败，超时同时记失败和超时，其他失败不影响地址健康状态。
    pub async fn invoke_with_cancellation(
        &self,
        context: RemoteInvokeContext,
        timeout: Option<Duration>,
        cancel: CancellationToken,
    ) -> Result<RemoteInvokeResultMessage> {
        let service_id = context.message.service_id.clone();
        if service_id.trim().is_empty() {
            return Err(FlareError::invalid_parameter("service id must not be empty"));
        }

        let endpoint = match self
            .resolver
            .resolve(&service_id, context.routing_hint.as_deref())
            .await
        {
            Ok(Some(endpoint)) => endpoint,
            Ok(None) => return Err(FlareError::service_unresolvable(&service_id)),
            Err(e) => {
                tracing::warn!(service_id = %service_id, error = %e, "Failed to resolve service address");
                return Err(FlareError::service_unresolvable(&service_id));
            }
        };
        RpcContext::set_attachment(REMOTE_ADDRESS, endpoint.to_string());

        let limit = timeout.unwrap_or(self.default_timeout);
        let result = self.send(&endpoint, context.message, limit, cancel).await;
        if let Err(e) = &result {
            self.report(&service_id, &endpoint, e);
        }
        result
    }

    async fn send(
        &self,
        endpoint: &Endpoint,
        message: RemoteInvokeMessage,
        limit: Duration,
        cancel: CancellationToken,
    ) -> Result<RemoteInvokeResultMessage> {
        let client = self.factory.create_client(endpoint).await?;
        let token = cancel.child_token();

        let outcome = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(FlareError::localized(
                    ErrorCode::OperationFailed,
                    "Remote invocation cancelled by caller",
                ));
            }
            outcome = tokio::time::timeout(limit, client.send(message, token.clone())) => outcome,
        };

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                token.cancel();
                Err(FlareError::timeout(format!(
                    "Remote invocation to {} timed out after {:?}",
                    endpoint, limit
                )))
            }
        }
    }

    /// 失败分类并反馈给健康监控
    fn report(&self, service_id: &str, endpoint: &Endpoint, error: &FlareError) {
        if error.is_communication() {
            tracing::warn!(service_id = %service_id, endpoint = %endpoint, error = %error, "Remote invocation communication failure");
            self.health.mark_failure(endpoint);
        } else if error.is_timeout() {
            tracing::warn!(service_id = %service_id, endpoint = %endpoint, error = %error, "Remote invocation timed out");
            self.health.mark_failure_for_timeout(endpoint);
        } else {
            tracing::error!(service_id = %service_id, endpoint = %endpoint, error = %error, "Remote invocation failed");
        }
    }
}
