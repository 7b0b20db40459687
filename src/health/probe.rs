//! 地址探测

use async_trait::async_trait;
use std::process::Stdio;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::timeout;

use super::entry::ProbeOutcome;
use crate::config::ReachabilityProbe;
use crate::error::{FlareError, Result};
use crate::types::Endpoint;

/// 探测器 trait
#[async_trait]
pub trait Prober: Send + Sync {
    /// 主机可达性探测
    async fn reachable(&self, endpoint: &Endpoint) -> bool;

    /// TCP 连接探测
    async fn connect(&self, endpoint: &Endpoint, timeout: Duration) -> Result<()>;
}

/// 先探测可达性，可达时再做连接探测
pub(crate) async fn probe(prober: &dyn Prober, endpoint: &Endpoint, limit: Duration) -> ProbeOutcome {
    if !prober.reachable(endpoint).await {
        tracing::debug!(endpoint = %endpoint, "Host is unreachable");
        return ProbeOutcome::Unreachable;
    }
    match prober.connect(endpoint, limit).await {
        Ok(()) => ProbeOutcome::Healthy,
        Err(e) => {
            tracing::warn!(endpoint = %endpoint, error = %e, "Service endpoint is unhealthy");
            ProbeOutcome::ConnectFailed
        }
    }
}

/// 默认探测器：系统 `ping` + TCP 连接
#[derive(Debug, Clone)]
pub struct DefaultProber {
    reachability: ReachabilityProbe,
    ping_timeout: Duration,
}

impl DefaultProber {
    pub fn new(reachability: ReachabilityProbe, ping_timeout: Duration) -> Self {
        Self {
            reachability,
            ping_timeout,
        }
    }

    async fn ping(&self, host: &str) -> bool {
        let wait_secs = self.ping_timeout.as_secs().max(1).to_string();
        let mut command = Command::new("ping");
        command
            .args(["-c", "1", "-W", &wait_secs, host])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match timeout(self.ping_timeout + Duration::from_secs(1), command.status()).await {
            Ok(Ok(status)) => status.success(),
            Ok(Err(e)) => {
                tracing::debug!(host = %host, error = %e, "Failed to run ping");
                false
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Prober for DefaultProber {
    async fn reachable(&self, endpoint: &Endpoint) -> bool {
        match self.reachability {
            ReachabilityProbe::None => true,
            ReachabilityProbe::Icmp => self.ping(endpoint.host()).await,
        }
    }

    async fn connect(&self, endpoint: &Endpoint, limit: Duration) -> Result<()> {
        let addr = endpoint.to_socket_addr().await?;
        match timeout(limit, TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(FlareError::timeout(format!(
                "Connect to {} timed out after {:?}",
                endpoint, limit
            ))),
        }
    }
}
