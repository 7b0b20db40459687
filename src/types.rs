//! 地址模型
//!
//! `Endpoint` 是健康表与路由地址集合的唯一键，按值比较。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

use crate::error::{FlareError, Result};

/// 网络端点（主机 + 端口）
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    /// 创建新的端点
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// 解析为可连接的 socket 地址
    ///
    /// IP 字面量直接解析，主机名走 DNS 解析并取第一个结果
    pub async fn to_socket_addr(&self) -> Result<SocketAddr> {
        if let Ok(ip) = self.host.parse::<std::net::IpAddr>() {
            return Ok(SocketAddr::new(ip, self.port));
        }
        tokio::net::lookup_host((self.host.as_str(), self.port))
            .await?
            .next()
            .ok_or_else(|| FlareError::connection_failed(format!("无法解析主机: {}", self.host)))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

impl FromStr for Endpoint {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        if let Ok(addr) = s.parse::<SocketAddr>() {
            return Ok(addr.into());
        }
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| FlareError::invalid_parameter(format!("地址缺少端口: {}", s)))?;
        if host.is_empty() {
            return Err(FlareError::invalid_parameter(format!("地址缺少主机: {}", s)));
        }
        let port = port
            .parse::<u16>()
            .map_err(|e| FlareError::invalid_parameter(format!("无效端口 {}: {}", s, e)))?;
        Ok(Self::new(host, port))
    }
}

impl From<SocketAddr> for Endpoint {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}
