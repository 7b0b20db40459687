//! 负载均衡模块
//!
//! 从健康的候选地址中选择一个

use rand::Rng;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::LoadBalanceStrategy;
use crate::types::Endpoint;

/// 负载均衡器
#[derive(Debug)]
pub struct LoadBalancer {
    strategy: LoadBalanceStrategy,
    round_robin_index: AtomicUsize,
}

impl LoadBalancer {
    pub fn new(strategy: LoadBalanceStrategy) -> Self {
        Self {
            strategy,
            round_robin_index: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> LoadBalanceStrategy {
        self.strategy
    }

    /// 选择地址；一致性哈希使用路由提示作为键
    pub fn select<'a>(&self, endpoints: &'a [Endpoint], key: Option<&str>) -> Option<&'a Endpoint> {
        if endpoints.is_empty() {
            return None;
        }

        match self.strategy {
            LoadBalanceStrategy::RoundRobin => self.select_round_robin(endpoints),
            LoadBalanceStrategy::Random => self.select_random(endpoints),
            LoadBalanceStrategy::ConsistentHash => match key {
                Some(key) => self.select_consistent_hash(endpoints, key),
                // 没有提示时退化为轮询
                None => self.select_round_robin(endpoints),
            },
        }
    }

    fn select_round_robin<'a>(&self, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        let index = self.round_robin_index.fetch_add(1, Ordering::Relaxed);
        endpoints.get(index % endpoints.len())
    }

    fn select_random<'a>(&self, endpoints: &'a [Endpoint]) -> Option<&'a Endpoint> {
        let index = rand::thread_rng().gen_range(0..endpoints.len());
        endpoints.get(index)
    }

    fn select_consistent_hash<'a>(&self, endpoints: &'a [Endpoint], key: &str) -> Option<&'a Endpoint> {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish();

        endpoints.get((hash as usize) % endpoints.len())
    }
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(LoadBalanceStrategy::RoundRobin)
    }
}
