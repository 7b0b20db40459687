//! 服务路由数据模型

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::error::Result;
use crate::types::Endpoint;

/// 标记重载服务的元数据键，带此标记的服务不参与模板路径匹配
pub const IS_OVERLOAD: &str = "IsOverload";

/// 服务描述
///
/// 元数据使用有序表，保证序列化结果稳定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub id: String,
    #[serde(default)]
    pub route_path: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl ServiceDescriptor {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            route_path: String::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn with_route_path(mut self, route_path: impl Into<String>) -> Self {
        self.route_path = route_path.into();
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata(&self, key: &str) -> Option<&Value> {
        self.metadata.get(key)
    }

    pub fn is_overload(&self) -> bool {
        self.metadata
            .get(IS_OVERLOAD)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// 服务路由：服务描述及其提供者地址集合
///
/// 地址按插入顺序保存且不重复。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRoute {
    pub descriptor: ServiceDescriptor,
    #[serde(default)]
    pub addresses: Vec<Endpoint>,
}

impl ServiceRoute {
    pub fn new(descriptor: ServiceDescriptor, addresses: impl IntoIterator<Item = Endpoint>) -> Self {
        let mut route = Self {
            descriptor,
            addresses: Vec::new(),
        };
        for address in addresses {
            route.insert_address(address);
        }
        route
    }

    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    pub fn contains(&self, address: &Endpoint) -> bool {
        self.addresses.contains(address)
    }

    /// 插入地址；已存在的相等地址原位替换
    fn insert_address(&mut self, address: Endpoint) {
        match self.addresses.iter_mut().find(|a| **a == address) {
            Some(slot) => *slot = address,
            None => self.addresses.push(address),
        }
    }

    /// 合并新注册的路由：描述以新值为准，地址追加
    pub fn merge(mut self, incoming: ServiceRoute) -> Self {
        self.descriptor = incoming.descriptor;
        for address in incoming.addresses {
            self.insert_address(address);
        }
        self
    }

    /// 移除给定地址，没有任何地址被移除时返回 `None`
    pub fn without(&self, addresses: &[Endpoint]) -> Option<Self> {
        if !self.addresses.iter().any(|a| addresses.contains(a)) {
            return None;
        }
        let mut route = self.clone();
        route.addresses.retain(|a| !addresses.contains(a));
        Some(route)
    }

    /// 节点负载：`{"descriptor": .., "addresses": [..]}`
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let route: ServiceRoute = serde_json::from_slice(bytes)?;
        // 存储中的数据可能带重复地址
        Ok(Self::new(route.descriptor, route.addresses))
    }
}

/// 路由变更事件
#[derive(Debug, Clone, PartialEq)]
pub enum RouteEvent {
    Created(ServiceRoute),
    Changed {
        route: ServiceRoute,
        previous: ServiceRoute,
    },
    Removed(ServiceRoute),
}

impl RouteEvent {
    /// 事件对应的（新）路由
    pub fn route(&self) -> &ServiceRoute {
        match self {
            RouteEvent::Created(route) | RouteEvent::Removed(route) => route,
            RouteEvent::Changed { route, .. } => route,
        }
    }
}
