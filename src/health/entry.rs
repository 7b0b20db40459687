//! 地址监控条目

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::OnceCell;

use crate::types::Endpoint;

/// 超时计数在最后一次超时之后保留的天数
const TIMEOUT_DECAY_DAYS: i64 = 1;

/// 单次探测结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    /// 可达且 TCP 连接成功
    Healthy,
    /// 可达性探测失败，未尝试连接
    Unreachable,
    /// 可达但连接失败或超时
    ConnectFailed,
}

/// 监控条目的只读视图
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonitorSnapshot {
    pub endpoint: Endpoint,
    pub healthy: bool,
    pub unhealthy_count: u32,
    pub timeout_count: u32,
    pub last_timeout_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct EntryState {
    healthy: bool,
    unhealthy_count: u32,
    timeout_count: u32,
    last_timeout_at: Option<DateTime<Utc>>,
}

/// 单个地址的健康状态
///
/// 计数器只在条目锁内修改。`init` 保证首次探测对每个条目只执行一次，
/// 并发的调用方等待同一次探测完成。
pub(crate) struct MonitorEntry {
    endpoint: Endpoint,
    state: Mutex<EntryState>,
    init: OnceCell<()>,
}

impl MonitorEntry {
    pub(crate) fn new(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            state: Mutex::new(EntryState {
                healthy: true,
                unhealthy_count: 0,
                timeout_count: 0,
                last_timeout_at: None,
            }),
            init: OnceCell::new(),
        }
    }

    pub(crate) fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub(crate) fn initializer(&self) -> &OnceCell<()> {
        &self.init
    }

    pub(crate) fn is_healthy(&self) -> bool {
        self.state.lock().healthy
    }

    pub(crate) fn record_probe(&self, outcome: ProbeOutcome, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        match outcome {
            ProbeOutcome::Healthy => {
                state.unhealthy_count = 0;
                state.healthy = true;
                let expired = state
                    .last_timeout_at
                    .is_some_and(|at| now - at > ChronoDuration::days(TIMEOUT_DECAY_DAYS));
                if state.timeout_count > 0 && expired {
                    state.timeout_count = 0;
                    state.last_timeout_at = None;
                }
            }
            ProbeOutcome::Unreachable | ProbeOutcome::ConnectFailed => {
                state.unhealthy_count = state.unhealthy_count.saturating_add(1);
                state.healthy = false;
            }
        }
    }

    pub(crate) fn mark_failure(&self) {
        let mut state = self.state.lock();
        state.healthy = false;
        state.unhealthy_count = state.unhealthy_count.saturating_add(1);
    }

    pub(crate) fn mark_timeout(&self, now: DateTime<Utc>) {
        let mut state = self.state.lock();
        state.healthy = false;
        state.unhealthy_count = state.unhealthy_count.saturating_add(1);
        state.timeout_count = state.timeout_count.saturating_add(1);
        state.last_timeout_at = Some(now);
    }

    pub(crate) fn set_last_timeout_at(&self, at: Option<DateTime<Utc>>) {
        self.state.lock().last_timeout_at = at;
    }

    /// 两个计数都达到阈值时需要剔除
    pub(crate) fn exceeds(&self, unhealthy_threshold: u32, timeout_threshold: u32) -> bool {
        let state = self.state.lock();
        state.unhealthy_count >= unhealthy_threshold && state.timeout_count >= timeout_threshold
    }

    pub(crate) fn snapshot(&self) -> MonitorSnapshot {
        let state = self.state.lock();
        MonitorSnapshot {
            endpoint: self.endpoint.clone(),
            healthy: state.healthy,
            unhealthy_count: state.unhealthy_count,
            timeout_count: state.timeout_count,
            last_timeout_at: state.last_timeout_at,
        }
    }
}
