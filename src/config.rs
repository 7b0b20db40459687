use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{ErrorCode, FlareError, Result, ResultExt};
use crate::types::Endpoint;

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub registry: RegistryConfig,
    pub health_check: HealthCheckConfig,
    pub invoker: InvokerConfig,
    pub log: LogConfig,
}

impl Config {
    pub fn load_from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path).or_code(
            ErrorCode::ConfigurationError,
            format!("Failed to read config file: {}", path),
        )?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if !self.registry.root_path.starts_with('/') {
            return Err(FlareError::configuration_error(format!(
                "registry.root_path must be absolute: {}",
                self.registry.root_path
            )));
        }
        if self.health_check.interval_secs == 0 {
            return Err(FlareError::configuration_error(
                "health_check.interval_secs must be positive",
            ));
        }
        Ok(())
    }
}

/// 路由注册中心配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 路由根节点，每个服务 id 对应其下的一个子节点
    pub root_path: String,
    /// 本机地址，健康监控跳过该地址
    pub local_address: Option<Endpoint>,
    pub store: StoreConfig,
    /// 事件通道容量
    pub event_capacity: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            root_path: "/flare/routes".to_string(),
            local_address: None,
            store: StoreConfig::default(),
            event_capacity: 256,
        }
    }
}

impl RegistryConfig {
    pub fn with_root_path(mut self, root_path: impl Into<String>) -> Self {
        self.root_path = root_path.into();
        self
    }

    pub fn with_local_address(mut self, address: Endpoint) -> Self {
        self.local_address = Some(address);
        self
    }

    pub fn with_store(mut self, store: StoreConfig) -> Self {
        self.store = store;
        self
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(default = "default_store_backend")]
    pub backend: String, // memory, etcd
    pub endpoints: Vec<String>,
}

fn default_store_backend() -> String {
    "memory".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_store_backend(),
            endpoints: Vec::new(),
        }
    }
}

/// 可达性探测方式
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReachabilityProbe {
    /// ICMP echo（系统 ping）
    Icmp,
    /// 跳过可达性探测，直接做 TCP 连接探测
    None,
}

/// 健康检查配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HealthCheckConfig {
    /// 探测周期（秒）
    pub interval_secs: u64,
    /// 单次探测超时（毫秒）
    pub timeout_ms: u64,
    /// 允许的不健康次数，达到后（同时满足超时阈值）剔除地址
    pub unhealthy_threshold: u32,
    /// 允许的超时次数
    pub timeout_threshold: u32,
    pub reachability: ReachabilityProbe,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            timeout_ms: 3000,
            unhealthy_threshold: 5,
            timeout_threshold: 5,
            reachability: ReachabilityProbe::Icmp,
        }
    }
}

impl HealthCheckConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval_secs = interval.as_secs().max(1);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_thresholds(mut self, unhealthy: u32, timeout: u32) -> Self {
        self.unhealthy_threshold = unhealthy;
        self.timeout_threshold = timeout;
        self
    }

    pub fn with_reachability(mut self, reachability: ReachabilityProbe) -> Self {
        self.reachability = reachability;
        self
    }
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoadBalanceStrategy {
    /// 轮询
    #[default]
    RoundRobin,
    /// 随机
    Random,
    /// 一致性哈希（按路由提示）
    ConsistentHash,
}

impl std::str::FromStr for LoadBalanceStrategy {
    type Err = FlareError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "round_robin" | "roundrobin" => Ok(LoadBalanceStrategy::RoundRobin),
            "random" => Ok(LoadBalanceStrategy::Random),
            "consistent_hash" | "consistenthash" | "hash" => Ok(LoadBalanceStrategy::ConsistentHash),
            _ => Err(FlareError::configuration_error(format!(
                "Unknown load balance strategy: {}",
                s
            ))),
        }
    }
}

/// 远程调用配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InvokerConfig {
    /// 默认调用超时（毫秒）
    pub default_timeout_ms: u64,
    pub load_balance: LoadBalanceStrategy,
}

impl Default for InvokerConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 30_000,
            load_balance: LoadBalanceStrategy::default(),
        }
    }
}

impl InvokerConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_load_balance(mut self, strategy: LoadBalanceStrategy) -> Self {
        self.load_balance = strategy;
        self
    }
}

/// 日志配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}
