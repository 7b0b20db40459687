//! 服务路由注册中心模块
//!
//! 路由保存在协调存储的层级节点中，本地维护写时复制的快照，并通过一次性 watch 同步。

pub mod manager;
pub mod matcher;
pub mod route;
mod watcher;

pub use manager::{RouteCountHint, ServiceRouteManager};
pub use matcher::matches_template;
pub use route::{RouteEvent, ServiceDescriptor, ServiceRoute, IS_OVERLOAD};
