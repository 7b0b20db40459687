//! 事件总线
//!
//! 注册中心与健康监控各自持有一个 `EventBus`，订阅方通过 `subscribe`
//! 获取独立的接收端。通道开启 overflow：慢订阅者丢弃最旧事件，发布方从不阻塞。

use async_broadcast::{InactiveReceiver, Sender, TrySendError};

pub use async_broadcast::{Receiver as EventReceiver, RecvError};

/// 类型化的发布/订阅通道
pub struct EventBus<T: Clone> {
    sender: Sender<T>,
    // 保持通道在没有活跃订阅者时仍然打开
    keepalive: InactiveReceiver<T>,
}

impl<T: Clone> EventBus<T> {
    pub fn new(capacity: usize) -> Self {
        let (mut sender, receiver) = async_broadcast::broadcast(capacity.max(1));
        sender.set_overflow(true);
        sender.set_await_active(false);
        Self {
            sender,
            keepalive: receiver.deactivate(),
        }
    }

    /// 订阅后续发布的事件
    pub fn subscribe(&self) -> EventReceiver<T> {
        self.keepalive.activate_cloned()
    }

    /// 发布事件；没有订阅者时直接丢弃
    pub fn publish(&self, event: T) {
        match self.sender.try_broadcast(event) {
            Ok(_) | Err(TrySendError::Inactive(_)) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                tracing::debug!("event bus dropped an event");
            }
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
