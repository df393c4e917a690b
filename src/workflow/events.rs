//! 进度事件
//!
//! 调度逻辑只发事件，不直接打印；默认的 `TracingObserver` 把事件写进日志。

use std::sync::Mutex;
use std::time::Duration;
use tracing::{info, warn};

use crate::models::outcome::{Classification, FailureKind};
use crate::utils::logging;

/// 进度事件
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent {
    RunStarted {
        total_jobs: usize,
        skipped: usize,
        max_rounds: usize,
        models: Vec<String>,
    },
    Cooldown {
        round: usize,
        delay: Duration,
    },
    RoundStarted {
        round: usize,
        queued: usize,
    },
    AttemptFinished {
        job_id: String,
        round: usize,
        model: String,
        classification: Classification,
        latency: Duration,
        message: Option<String>,
    },
    JobRequeued {
        job_id: String,
        round: usize,
        kind: Option<FailureKind>,
    },
    JobResolved {
        job_id: String,
        round: usize,
        attempts: usize,
        /// 成功时为实际使用的模型
        model_used: Option<String>,
        /// 失败时为失败类型
        failure: Option<FailureKind>,
    },
    RoundFinished {
        round: usize,
        resolved: usize,
        requeued: usize,
    },
    RunFinished {
        success: usize,
        failed: usize,
        stopped: bool,
    },
}

pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

/// 把事件写进 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match event {
            ProgressEvent::RunStarted {
                total_jobs,
                skipped,
                max_rounds,
                models,
            } => {
                if *skipped > 0 {
                    info!("⏭️ 跳过 {} 个已提取的文件", skipped);
                }
                info!("📁 待处理图片: {}", total_jobs);
                info!("🤖 候选模型: {}", models.join(" → "));
                info!("🔄 最大轮数: {}", max_rounds);
            }
            ProgressEvent::Cooldown { round, delay } => {
                info!("⏸️ 第 {} 轮开始前冷却 {:?}", round + 1, delay);
            }
            ProgressEvent::RoundStarted { round, queued } => {
                logging::log_round_start(*round, *queued);
            }
            ProgressEvent::AttemptFinished {
                job_id,
                round,
                model,
                classification,
                latency,
                message,
            } => match classification {
                Classification::Success => {
                    info!(
                        "[{}] (第 {} 轮) ✅ {} 成功，耗时 {:?}",
                        job_id,
                        round + 1,
                        model,
                        latency
                    );
                }
                other => {
                    warn!(
                        "[{}] (第 {} 轮) ⚠️ {} 失败: {} {}",
                        job_id,
                        round + 1,
                        model,
                        other,
                        message.as_deref().unwrap_or("")
                    );
                }
            },
            ProgressEvent::JobRequeued { job_id, round, kind } => {
                let kind = kind.map(|k| k.to_string()).unwrap_or_default();
                info!(
                    "[{}] 🔄 第 {} 轮失败 ({})，放入重试队列",
                    job_id,
                    round + 1,
                    kind
                );
            }
            ProgressEvent::JobResolved {
                job_id,
                attempts,
                model_used,
                failure,
                ..
            } => match (model_used, failure) {
                (Some(model), _) => {
                    if *attempts > 1 {
                        info!("[{}] 💾 已保存（{} 次尝试后由 {} 成功）", job_id, attempts, model);
                    } else {
                        info!("[{}] 💾 已保存（模型: {}）", job_id, model);
                    }
                }
                (None, Some(kind)) => {
                    warn!("[{}] ⛔ 最终失败: {}", job_id, kind);
                }
                (None, None) => {}
            },
            ProgressEvent::RoundFinished {
                round,
                resolved,
                requeued,
            } => {
                logging::log_round_complete(*round, *resolved, *requeued);
            }
            ProgressEvent::RunFinished {
                success,
                failed,
                stopped,
            } => {
                if *stopped {
                    warn!("🛑 运行被中止: 成功 {}，失败 {}", success, failed);
                } else {
                    info!("🏁 运行结束: 成功 {}，失败 {}", success, failed);
                }
            }
        }
    }
}

/// 收集所有事件，便于检查调度过程
#[derive(Debug, Default)]
pub struct CollectingObserver {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// 所有尝试事件里出现过的 (任务, 模型)
    pub fn attempts(&self) -> Vec<(String, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                ProgressEvent::AttemptFinished { job_id, model, .. } => Some((job_id, model)),
                _ => None,
            })
            .collect()
    }
}

impl ProgressObserver for CollectingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push(event.clone()),
            Err(poisoned) => poisoned.into_inner().push(event.clone()),
        }
    }
}
