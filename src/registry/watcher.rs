//! 节点 watch 状态

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// 单个路由节点的 watch 状态
///
/// 记录最后一次观察到的节点数据，用于跳过内容相同的通知。
pub(crate) struct NodeWatcher {
    pub(crate) id: String,
    pub(crate) path: String,
    last: Mutex<Option<Vec<u8>>>,
    cancel: CancellationToken,
}

impl NodeWatcher {
    pub(crate) fn new(id: String, path: String, cancel: CancellationToken) -> Self {
        Self {
            id,
            path,
            last: Mutex::new(None),
            cancel,
        }
    }

    /// 记录新数据，与上次相同返回 `false`
    pub(crate) fn observe(&self, bytes: &[u8]) -> bool {
        let mut last = self.last.lock();
        if last.as_deref() == Some(bytes) {
            return false;
        }
        *last = Some(bytes.to_vec());
        true
    }

    pub(crate) fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }
}
