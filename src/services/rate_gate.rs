//! 限流闸门 - 业务能力层
//!
//! 运行级（不是任务级）的放行闸门：任何一个 worker 遇到限流，
//! 所有 worker 在冷却窗口内都不再发起新的尝试；已经发出的请求不受影响。

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::infrastructure::delay::Delay;
use crate::infrastructure::stop_signal::StopSignal;

pub struct RateGate {
    paused_until: Mutex<Option<Instant>>,
    delay: Arc<dyn Delay>,
}

impl RateGate {
    pub fn new(delay: Arc<dyn Delay>) -> Self {
        Self {
            paused_until: Mutex::new(None),
            delay,
        }
    }

    /// 暂停放行 `window`；已有更晚的暂停时保留更晚的那个
    pub async fn trip(&self, window: Duration) {
        let until = Instant::now() + window;
        let mut paused = self.paused_until.lock().await;
        *paused = match *paused {
            Some(existing) if existing > until => Some(existing),
            _ => Some(until),
        };
        debug!("限流闸门关闭 {:?}", window);
    }

    /// 距离重新放行还剩多久
    pub async fn remaining(&self) -> Option<Duration> {
        let paused = self.paused_until.lock().await;
        paused
            .and_then(|until| until.checked_duration_since(Instant::now()))
            .filter(|d| !d.is_zero())
    }

    /// 等待放行；被停止信号打断返回 `false`
    ///
    /// 等待期间其他任务可能再次触发限流，所以每次醒来都要重新检查。
    pub async fn admit(&self, stop: &StopSignal) -> bool {
        if stop.is_stopped() {
            return false;
        }
        while let Some(wait) = self.remaining().await {
            if !self.delay.wait(wait, stop).await {
                return false;
            }
        }
        !stop.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::delay::{RecordingDelay, TokioDelay};

    #[tokio::test]
    async fn test_open_gate_admits_without_waiting() {
        let delay = Arc::new(RecordingDelay::new());
        let gate = RateGate::new(delay.clone());
        let stop = StopSignal::new();

        assert!(gate.admit(&stop).await);
        assert!(delay.waits().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_tripped_gate_waits_for_window() {
        let gate = RateGate::new(Arc::new(TokioDelay));
        let stop = StopSignal::new();

        gate.trip(Duration::from_secs(2)).await;
        assert_eq!(gate.remaining().await, Some(Duration::from_secs(2)));

        // 较短的暂停不会缩短已有窗口
        gate.trip(Duration::from_secs(1)).await;
        assert_eq!(gate.remaining().await, Some(Duration::from_secs(2)));

        let started = Instant::now();
        assert!(gate.admit(&stop).await);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(gate.remaining().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_extended_pause_holds_waiting_admission() {
        let gate = Arc::new(RateGate::new(Arc::new(TokioDelay)));
        let stop = StopSignal::new();
        let started = Instant::now();

        gate.trip(Duration::from_secs(2)).await;
        let waiter = {
            let gate = gate.clone();
            let stop = stop.clone();
            tokio::spawn(async move {
                let admitted = gate.admit(&stop).await;
                (admitted, Instant::now())
            })
        };

        // 等待期间另一个任务遇到限流，窗口延长到第 6 秒
        tokio::time::sleep(Duration::from_secs(1)).await;
        gate.trip(Duration::from_secs(5)).await;

        let (admitted, admitted_at) = waiter.await.unwrap();
        assert!(admitted);
        assert!(admitted_at.duration_since(started) >= Duration::from_secs(6));
    }

    #[tokio::test]
    async fn test_stopped_gate_refuses() {
        let gate = RateGate::new(Arc::new(RecordingDelay::new()));
        let stop = StopSignal::new();
        stop.cancel();
        assert!(!gate.admit(&stop).await);
    }
}
