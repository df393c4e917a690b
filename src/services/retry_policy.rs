//! 重试 / 回退策略 - 业务能力层
//!
//! 两个纯函数：
//! - `classify`：把状态码或传输故障归类
//! - `RetryPolicy::decide`：根据分类决定下一步（重试同一模型、换模型、本轮失败、终止任务、中止运行）
//!
//! 所有时长常量都是配置项，不是硬编码行为。

use std::time::Duration;

use crate::clients::FaultKind;
use crate::models::outcome::{Classification, ExtractionOutcome};

/// 把一次调用的结果归类
///
/// 有状态码时只看状态码；没有状态码时看传输故障类型。
pub fn classify(status: Option<u16>, fault: Option<FaultKind>) -> Classification {
    match status {
        Some(200..=299) => Classification::Success,
        Some(429) => Classification::RateLimited,
        Some(401) | Some(403) => Classification::Fatal,
        Some(408) => Classification::TransientNetwork,
        Some(400..=499) => Classification::UnsupportedOrBadRequest,
        Some(_) => Classification::ServerError,
        None => match fault {
            Some(FaultKind::MalformedBody) => Classification::ServerError,
            Some(FaultKind::Timeout)
            | Some(FaultKind::Connection)
            | Some(FaultKind::Other)
            | None => Classification::TransientNetwork,
        },
    }
}

/// 同一轮内的下一步动作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// 成功，结束任务
    Finish,
    /// 等待后重试同一模型
    RetrySameModel(Duration),
    /// 换下一个模型
    NextModel,
    /// 本轮失败，交给轮次调度器
    FailRound,
    /// 不可重试的本地失败，直接终止任务
    FailJob,
    /// 中止整次运行
    AbortRun,
}

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大轮数
    pub max_rounds: usize,
    /// 同一模型在一轮内的最大重试次数（不含首次）
    pub max_intra_round_retries: u32,
    /// 指数退避基数
    pub backoff_base: Duration,
    /// 单次退避上限
    pub max_backoff: Duration,
    /// 限流后全局暂停放行的时长
    pub rate_limit_cooldown: Duration,
    /// 模型不支持 / 请求错误后换模型前的停顿
    pub model_switch_delay: Duration,
    /// 轮间冷却基数，第 r 轮前等待 `round_cooldown * r`
    pub round_cooldown: Duration,
    /// 同一 worker 两个任务之间的间隔
    pub request_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_rounds: 3,
            max_intra_round_retries: 2,
            backoff_base: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            rate_limit_cooldown: Duration::from_secs(2),
            model_switch_delay: Duration::from_secs(1),
            round_cooldown: Duration::from_secs(5),
            request_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// 第 `attempt_index` 次重试前的退避：`base * 2^attempt_index`，不超过上限
    pub fn backoff(&self, attempt_index: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt_index).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }

    /// 进入第 `round` 轮前的冷却（第 0 轮不冷却）
    pub fn round_cooldown(&self, round: usize) -> Duration {
        let factor = u32::try_from(round).unwrap_or(u32::MAX);
        self.round_cooldown
            .checked_mul(factor)
            .unwrap_or(Duration::MAX)
    }

    /// 根据单次尝试的结果决定下一步
    ///
    /// - `retry_index`：当前模型在本轮已经重试的次数
    /// - `has_next_model`：候选列表里是否还有下一个模型
    pub fn decide(
        &self,
        outcome: &ExtractionOutcome,
        retry_index: u32,
        has_next_model: bool,
    ) -> Decision {
        let classification = match outcome.classification() {
            Some(c) => c,
            None => return Decision::FailJob,
        };

        match classification {
            Classification::Success => Decision::Finish,
            Classification::Fatal => Decision::AbortRun,
            Classification::RateLimited | Classification::UnsupportedOrBadRequest => {
                if has_next_model {
                    Decision::NextModel
                } else {
                    Decision::FailRound
                }
            }
            Classification::TransientNetwork | Classification::ServerError => {
                if retry_index < self.max_intra_round_retries {
                    Decision::RetrySameModel(self.backoff(retry_index))
                } else if has_next_model {
                    Decision::NextModel
                } else {
                    Decision::FailRound
                }
            }
        }
    }
}
