//! Flare RPC Routing Library
//!
//! Service route registry, address health monitoring and health-aware remote invocation
//! for the flare RPC platform.

pub mod config;
pub mod error;
pub mod event;
pub mod telemetry;
pub mod types;

// 协调存储
pub mod store;

// 路由、健康检查与调用
pub mod client;
pub mod health;
pub mod registry;
pub mod retry;

// 组件装配
pub mod runtime;

// Re-exports
pub use config::{
    Config, HealthCheckConfig, InvokerConfig, LoadBalanceStrategy, LogConfig, ReachabilityProbe,
    RegistryConfig, StoreConfig,
};
pub use error::{ErrorBuilder, ErrorCategory, ErrorCode, FlareError, Result};
pub use event::{EventBus, EventReceiver};
pub use store::{CoordinationStore, MemoryStore, WatchedEvent, WatchedEventKind};
pub use types::Endpoint;

pub use client::{
    AddressResolver, DefaultAddressResolver, LoadBalancer, RemoteInvokeContext,
    RemoteInvokeMessage, RemoteInvokeResultMessage, RemoteInvokeService, RpcContext,
    TransportClient, TransportClientFactory, TransportError,
};
pub use health::{
    AddressEvictor, DefaultProber, HealthCheckService, HealthEvent, MonitorSnapshot, Prober,
};
pub use registry::{
    RouteCountHint, RouteEvent, ServiceDescriptor, ServiceRoute, ServiceRouteManager,
};
pub use retry::{ExponentialBackoffPolicy, RetryPolicy};
pub use runtime::RoutingRuntime;
