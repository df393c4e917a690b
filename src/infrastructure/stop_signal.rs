//! 停止信号 - 基础设施层
//!
//! 运行级的协作式停止：操作者取消或致命错误中止都走这里。
//! 已经发出的请求允许跑完，新的尝试不再放行。

use std::sync::Arc;
use tokio::sync::watch;

/// 停止原因
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// 操作者取消（Ctrl-C）
    Cancelled,
    /// 致命错误（如凭证无效）
    Aborted(String),
}

/// 可克隆的停止信号，第一次设置的原因生效
#[derive(Debug, Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// 操作者取消
    pub fn cancel(&self) {
        self.raise(StopReason::Cancelled);
    }

    /// 致命错误中止
    pub fn abort(&self, message: impl Into<String>) {
        self.raise(StopReason::Aborted(message.into()));
    }

    fn raise(&self, reason: StopReason) {
        self.tx.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    pub fn is_stopped(&self) -> bool {
        self.tx.borrow().is_some()
    }

    pub fn reason(&self) -> Option<StopReason> {
        self.tx.borrow().clone()
    }

    /// 等到信号被触发
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|reason| reason.is_some()).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}
