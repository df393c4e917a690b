//! 单任务单轮的提取流程 - 流程层
//!
//! 核心职责：定义"一张图在一轮里"的完整处理流程
//!
//! 流程顺序：
//! 0. 读取并编码图片（失败则直接终止，不发请求）
//! 1. 等待限流闸门放行
//! 2. 按候选顺序调用模型
//! 3. 按策略决定：成功 / 重试同一模型 / 换模型 / 本轮失败 / 终止任务 / 中止运行
//!
//! 不持有任何任务队列，不关心轮次之间的事情。

use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

use crate::infrastructure::delay::Delay;
use crate::infrastructure::stop_signal::StopSignal;
use crate::models::job::{AttemptRecord, Job};
use crate::models::outcome::{Classification, ExtractionOutcome, FailureKind};
use crate::models::roster::ModelRoster;
use crate::services::completion_client::CompletionClient;
use crate::services::rate_gate::RateGate;
use crate::services::retry_policy::{Decision, RetryPolicy};
use crate::workflow::events::{ProgressEvent, ProgressObserver};

/// 一轮处理后的结论
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoundVerdict {
    /// 提取成功
    Succeeded(ExtractionOutcome),
    /// 本轮所有模型都失败，携带最后一次失败
    FailedThisRound(ExtractionOutcome),
    /// 不可重试的本地失败（图片编码失败）
    Terminal(ExtractionOutcome),
    /// 致命错误，整次运行需要中止
    Aborted(ExtractionOutcome),
    /// 停止信号触发，任务没有结论
    Interrupted,
}

/// 提取流程
pub struct ExtractFlow {
    client: CompletionClient,
    roster: ModelRoster,
    prompt: String,
    policy: RetryPolicy,
    gate: RateGate,
    delay: Arc<dyn Delay>,
    observer: Arc<dyn ProgressObserver>,
}

impl ExtractFlow {
    pub fn new(
        client: CompletionClient,
        roster: ModelRoster,
        prompt: impl Into<String>,
        policy: RetryPolicy,
        delay: Arc<dyn Delay>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            client,
            roster,
            prompt: prompt.into(),
            policy,
            gate: RateGate::new(delay.clone()),
            delay,
            observer,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// 对一个任务跑一轮
    pub async fn run_round(&self, job: &mut Job, round: usize, stop: &StopSignal) -> RoundVerdict {
        job.round = round;

        // 一轮只读一次图片，所有模型和重试共用
        let asset = match self.client.encode(job).await {
            Ok(asset) => asset,
            Err(failure) => return RoundVerdict::Terminal(failure),
        };
        let mut last_failure: Option<ExtractionOutcome> = None;

        for (index, model) in self.roster.iter().enumerate() {
            let has_next = self.roster.has_next(index);
            let mut retry_index: u32 = 0;

            loop {
                if !self.gate.admit(stop).await {
                    return RoundVerdict::Interrupted;
                }

                let started = Instant::now();
                let outcome = self.client.send(&asset, model, &self.prompt).await;
                let latency = started.elapsed();

                if let Some(classification) = outcome.classification() {
                    let message = match &outcome {
                        ExtractionOutcome::Failure { message, .. } => Some(message.clone()),
                        ExtractionOutcome::Success { .. } => None,
                    };
                    job.record(AttemptRecord {
                        round,
                        model: model.to_string(),
                        classification,
                        latency,
                        message: message.clone(),
                    });
                    self.observer.on_event(&ProgressEvent::AttemptFinished {
                        job_id: job.id(),
                        round,
                        model: model.to_string(),
                        classification,
                        latency,
                        message,
                    });
                }

                match self.policy.decide(&outcome, retry_index, has_next) {
                    Decision::Finish => return RoundVerdict::Succeeded(outcome),
                    Decision::FailJob => return RoundVerdict::Terminal(outcome),
                    Decision::AbortRun => {
                        stop.abort(format!("{} 凭证被拒绝: {}", model, outcome.message()));
                        return RoundVerdict::Aborted(outcome);
                    }
                    Decision::RetrySameModel(backoff) => {
                        debug!("{} {} 第 {} 次重试，等待 {:?}", job, model, retry_index + 1, backoff);
                        retry_index += 1;
                        if !self.delay.wait(backoff, stop).await {
                            return RoundVerdict::Interrupted;
                        }
                    }
                    Decision::NextModel => {
                        self.pause_before_switch(&outcome, stop).await;
                        last_failure = Some(outcome);
                        break;
                    }
                    Decision::FailRound => {
                        if outcome.classification() == Some(Classification::RateLimited) {
                            self.gate.trip(self.policy.rate_limit_cooldown).await;
                        }
                        return RoundVerdict::FailedThisRound(outcome);
                    }
                }
            }
        }

        RoundVerdict::FailedThisRound(last_failure.unwrap_or_else(|| {
            ExtractionOutcome::failure(FailureKind::UnsupportedOrBadRequest, "没有可用的模型")
        }))
    }

    /// 换模型前的停顿：限流关闭全局闸门，请求错误只在本任务内短暂等待
    async fn pause_before_switch(&self, outcome: &ExtractionOutcome, stop: &StopSignal) {
        match outcome.classification() {
            Some(Classification::RateLimited) => {
                self.gate.trip(self.policy.rate_limit_cooldown).await;
            }
            Some(Classification::UnsupportedOrBadRequest)
                if !self.policy.model_switch_delay.is_zero() =>
            {
                self.delay.wait(self.policy.model_switch_delay, stop).await;
            }
            _ => {}
        }
    }
}
