//! 可取消的延时 - 基础设施层
//!
//! 退避、冷却、限流暂停都通过 `Delay` 等待，停止信号触发时立即返回。
//! 测试里换成 `RecordingDelay`，只记录不睡眠。

use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

use crate::infrastructure::stop_signal::StopSignal;

#[async_trait]
pub trait Delay: Send + Sync {
    /// 等待 `duration`；完整等完返回 `true`，被停止信号打断返回 `false`
    async fn wait(&self, duration: Duration, stop: &StopSignal) -> bool;
}

/// 基于 tokio 计时器的延时
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDelay;

#[async_trait]
impl Delay for TokioDelay {
    async fn wait(&self, duration: Duration, stop: &StopSignal) -> bool {
        if stop.is_stopped() {
            return false;
        }
        if duration.is_zero() {
            return true;
        }

        tokio::select! {
            _ = tokio::time::sleep(duration) => !stop.is_stopped(),
            _ = stop.stopped() => false,
        }
    }
}

/// 只记录请求的等待时长、立即返回的延时
#[derive(Debug, Default)]
pub struct RecordingDelay {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingDelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// 至今记录到的所有等待
    pub fn waits(&self) -> Vec<Duration> {
        self.waits
            .lock()
            .map(|w| w.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl Delay for RecordingDelay {
    async fn wait(&self, duration: Duration, stop: &StopSignal) -> bool {
        match self.waits.lock() {
            Ok(mut waits) => waits.push(duration),
            Err(poisoned) => poisoned.into_inner().push(duration),
        }
        tokio::task::yield_now().await;
        !stop.is_stopped()
    }
}
