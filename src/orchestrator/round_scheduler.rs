//! 轮次调度器 - 编排层
//!
//! ## 职责
//!
//! 把任务队列按轮次反复处理，直到队列清空或轮数用完。
//!
//! ## 核心功能
//!
//! 1. **轮内并发**：Semaphore 限制同时运行的任务数，每个任务一个 tokio::spawn
//! 2. **轮间冷却**：第 r 轮开始前等待 `round_cooldown * r`
//! 3. **重新入队**：本轮失败的任务进入下一轮；最后一轮失败的任务记为 `Exhausted`
//! 4. **停止处理**：停止信号触发后不再开始新尝试，未完成的任务记为 `Cancelled`
//!
//! 一轮内的所有任务全部有结论后，下一轮才会开始。

use futures::future::join_all;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

use crate::infrastructure::delay::Delay;
use crate::infrastructure::stop_signal::{StopReason, StopSignal};
use crate::models::job::Job;
use crate::models::outcome::{ExtractionOutcome, FailureKind};
use crate::services::result_store::ResultStore;
use crate::workflow::events::{ProgressEvent, ProgressObserver};
use crate::workflow::extract_flow::{ExtractFlow, RoundVerdict};

/// 调度结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    /// 进入调度的任务数
    pub total_jobs: usize,
    /// 轮数
    pub rounds_run: usize,
    /// 停止原因（正常结束为 `None`）
    pub stop_reason: Option<StopReason>,
}

/// 任务在一轮结束后的去向
enum Disposition {
    Resolved,
    Requeue(Job),
    Unresolved(Job),
}

struct Shared {
    flow: ExtractFlow,
    store: Arc<ResultStore>,
    delay: Arc<dyn Delay>,
    observer: Arc<dyn ProgressObserver>,
    stop: StopSignal,
}

/// 轮次调度器
pub struct RoundScheduler {
    shared: Arc<Shared>,
    workers: usize,
}

impl RoundScheduler {
    pub fn new(
        flow: ExtractFlow,
        store: Arc<ResultStore>,
        delay: Arc<dyn Delay>,
        observer: Arc<dyn ProgressObserver>,
        stop: StopSignal,
        workers: usize,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                flow,
                store,
                delay,
                observer,
                stop,
            }),
            workers: workers.max(1),
        }
    }

    /// 跑完所有轮次
    pub async fn run(&self, jobs: Vec<Job>) -> RunReport {
        let shared = &self.shared;
        let total_jobs = jobs.len();
        let max_rounds = shared.flow.policy().max_rounds.max(1);
        let mut queue = jobs;
        let mut rounds_run = 0;

        for round in 0..max_rounds {
            if queue.is_empty() || shared.stop.is_stopped() {
                break;
            }

            if round > 0 {
                let cooldown = shared.flow.policy().round_cooldown(round);
                if !cooldown.is_zero() {
                    shared
                        .observer
                        .on_event(&ProgressEvent::Cooldown { round, delay: cooldown });
                    if !shared.delay.wait(cooldown, &shared.stop).await {
                        break;
                    }
                }
            }

            shared.observer.on_event(&ProgressEvent::RoundStarted {
                round,
                queued: queue.len(),
            });
            rounds_run += 1;

            let is_last_round = round + 1 == max_rounds;
            let results = self.run_round(std::mem::take(&mut queue), round).await;

            let mut resolved = 0;
            let mut requeued = 0;
            let mut unresolved = Vec::new();
            for (job, verdict) in results {
                match self.settle(job, verdict, round, is_last_round).await {
                    Disposition::Resolved => resolved += 1,
                    Disposition::Requeue(job) => {
                        requeued += 1;
                        queue.push(job);
                    }
                    Disposition::Unresolved(job) => unresolved.push(job),
                }
            }

            shared.observer.on_event(&ProgressEvent::RoundFinished {
                round,
                resolved,
                requeued,
            });

            queue.extend(unresolved);
            queue.sort_by_key(|job| job.ordinal);
        }

        // 剩下的任务只可能是被停止打断的
        let stop_reason = shared.stop.reason();
        if !queue.is_empty() {
            let message = match &stop_reason {
                Some(StopReason::Aborted(msg)) => format!("运行中止: {}", msg),
                _ => "运行被操作者取消".to_string(),
            };
            for job in queue {
                let outcome = ExtractionOutcome::failure(FailureKind::Cancelled, message.clone());
                self.finalize(&job, outcome).await;
            }
        }

        let records = shared.store.records().await;
        let success = records.iter().filter(|r| r.outcome.is_success()).count();
        shared.observer.on_event(&ProgressEvent::RunFinished {
            success,
            failed: records.len() - success,
            stopped: stop_reason.is_some(),
        });

        RunReport {
            total_jobs,
            rounds_run,
            stop_reason,
        }
    }

    /// 并发处理一轮里的所有任务
    async fn run_round(&self, jobs: Vec<Job>, round: usize) -> Vec<(Job, RoundVerdict)> {
        let semaphore = Arc::new(Semaphore::new(self.workers));
        // 还没拿到许可的任务数，为 0 时不再需要请求间隔
        let waiting = Arc::new(AtomicUsize::new(jobs.len()));
        let mut handles = Vec::with_capacity(jobs.len());

        for mut job in jobs {
            let snapshot = job.clone();
            let shared = self.shared.clone();
            let semaphore = semaphore.clone();
            let waiting = waiting.clone();

            let handle = tokio::spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (job, RoundVerdict::Interrupted),
                };
                waiting.fetch_sub(1, Ordering::SeqCst);
                if shared.stop.is_stopped() {
                    return (job, RoundVerdict::Interrupted);
                }

                let verdict = shared.flow.run_round(&mut job, round, &shared.stop).await;

                // 只在同一许可接着处理下一个任务之前停顿
                let pacing = shared.flow.policy().request_delay;
                let has_successor = waiting.load(Ordering::SeqCst) > 0;
                if !pacing.is_zero() && has_successor && !matches!(verdict, RoundVerdict::Interrupted) {
                    shared.delay.wait(pacing, &shared.stop).await;
                }
                (job, verdict)
            });
            handles.push((snapshot, handle));
        }

        let (snapshots, handles): (Vec<_>, Vec<_>) = handles.into_iter().unzip();
        let joined = join_all(handles).await;

        snapshots
            .into_iter()
            .zip(joined)
            .map(|(mut snapshot, result)| match result {
                Ok(pair) => pair,
                Err(e) => {
                    error!("{} 工作任务异常退出: {}", snapshot, e);
                    snapshot.round = round;
                    let outcome = ExtractionOutcome::failure(
                        FailureKind::ServerError,
                        format!("工作任务异常退出: {}", e),
                    );
                    (snapshot, RoundVerdict::FailedThisRound(outcome))
                }
            })
            .collect()
    }

    /// 根据一轮的结论决定任务去向
    async fn settle(
        &self,
        job: Job,
        verdict: RoundVerdict,
        round: usize,
        is_last_round: bool,
    ) -> Disposition {
        match verdict {
            RoundVerdict::Succeeded(outcome) | RoundVerdict::Terminal(outcome) => {
                self.finalize(&job, outcome).await;
                Disposition::Resolved
            }
            RoundVerdict::Aborted(outcome) => {
                let outcome =
                    ExtractionOutcome::failure(FailureKind::AuthError, outcome.message().to_string());
                self.finalize(&job, outcome).await;
                Disposition::Resolved
            }
            RoundVerdict::FailedThisRound(outcome) if is_last_round => {
                let outcome =
                    ExtractionOutcome::failure(FailureKind::Exhausted, outcome.message().to_string());
                self.finalize(&job, outcome).await;
                Disposition::Resolved
            }
            RoundVerdict::FailedThisRound(outcome) => {
                self.shared.observer.on_event(&ProgressEvent::JobRequeued {
                    job_id: job.id(),
                    round,
                    kind: outcome.failure_kind(),
                });
                Disposition::Requeue(job)
            }
            RoundVerdict::Interrupted => Disposition::Unresolved(job),
        }
    }

    /// 写入终态并发出事件
    async fn finalize(&self, job: &Job, outcome: ExtractionOutcome) {
        let outcome = match self.shared.store.persist(job, &outcome).await {
            Ok(_) => outcome,
            Err(e) => {
                error!("{} 结果写入失败: {}", job, e);
                // 与账本保持一致：没落盘的成功按 PersistError 上报
                if outcome.is_success() {
                    ExtractionOutcome::failure(FailureKind::PersistError, e.to_string())
                } else {
                    outcome
                }
            }
        };

        let (model_used, failure) = match &outcome {
            ExtractionOutcome::Success { model_used, .. } => (Some(model_used.clone()), None),
            ExtractionOutcome::Failure { kind, .. } => {
                if *kind == FailureKind::Cancelled {
                    warn!("{} 未完成，记为取消", job);
                }
                (None, Some(*kind))
            }
        };
        self.shared.observer.on_event(&ProgressEvent::JobResolved {
            job_id: job.id(),
            round: job.round,
            attempts: job.attempt_count(),
            model_used,
            failure,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clients::{
        ChatRequest, ScriptedTransport, TransportFault, TransportReply, VisionTransport,
    };
    use crate::infrastructure::delay::{RecordingDelay, TokioDelay};
    use crate::models::roster::ModelRoster;
    use crate::services::completion_client::CompletionClient;
    use crate::services::retry_policy::RetryPolicy;
    use crate::workflow::events::CollectingObserver;
    use std::time::Duration;
    use tempfile::TempDir;

    struct Harness {
        input: TempDir,
        output: TempDir,
        transport: Arc<ScriptedTransport>,
        delay: Arc<RecordingDelay>,
        observer: Arc<CollectingObserver>,
        stop: StopSignal,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                input: tempfile::tempdir().unwrap(),
                output: tempfile::tempdir().unwrap(),
                transport: Arc::new(ScriptedTransport::new()),
                delay: Arc::new(RecordingDelay::new()),
                observer: Arc::new(CollectingObserver::new()),
                stop: StopSignal::new(),
            }
        }

        fn jobs(&self, names: &[&str]) -> Vec<Job> {
            names
                .iter()
                .enumerate()
                .map(|(i, name)| {
                    let path = self.input.path().join(format!("{}.png", name));
                    std::fs::write(&path, name.as_bytes()).unwrap();
                    Job::new(path, i)
                })
                .collect()
        }

        async fn scheduler(&self, policy: RetryPolicy) -> (RoundScheduler, Arc<ResultStore>) {
            self.build(policy, self.transport.clone(), self.delay.clone(), 2)
                .await
        }

        async fn build(
            &self,
            policy: RetryPolicy,
            transport: Arc<dyn VisionTransport>,
            delay: Arc<dyn Delay>,
            workers: usize,
        ) -> (RoundScheduler, Arc<ResultStore>) {
            let store = Arc::new(ResultStore::open(self.output.path(), false).await.unwrap());
            let client = CompletionClient::new(transport, None, None);
            let flow = ExtractFlow::new(
                client,
                ModelRoster::new(["A"]).unwrap(),
                "prompt",
                policy,
                delay.clone(),
                self.observer.clone(),
            );
            let scheduler = RoundScheduler::new(
                flow,
                store.clone(),
                delay,
                self.observer.clone(),
                self.stop.clone(),
                workers,
            );
            (scheduler, store)
        }
    }

    /// 第一次收到请求时触发取消，然后照常返回脚本响应
    struct CancellingTransport {
        inner: Arc<ScriptedTransport>,
        stop: StopSignal,
    }

    #[async_trait::async_trait]
    impl VisionTransport for CancellingTransport {
        async fn post(&self, request: &ChatRequest) -> Result<TransportReply, TransportFault> {
            self.stop.cancel();
            self.inner.post(request).await
        }
    }

    /// 记录每次请求发出的时刻
    struct TimedTransport {
        inner: Arc<ScriptedTransport>,
        sent_at: std::sync::Mutex<Vec<tokio::time::Instant>>,
    }

    #[async_trait::async_trait]
    impl VisionTransport for TimedTransport {
        async fn post(&self, request: &ChatRequest) -> Result<TransportReply, TransportFault> {
            self.sent_at.lock().unwrap().push(tokio::time::Instant::now());
            self.inner.post(request).await
        }
    }

    fn policy(max_rounds: usize) -> RetryPolicy {
        RetryPolicy {
            max_rounds,
            max_intra_round_retries: 0,
            model_switch_delay: Duration::ZERO,
            rate_limit_cooldown: Duration::ZERO,
            request_delay: Duration::ZERO,
            round_cooldown: Duration::from_secs(5),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_failed_job_is_requeued_then_succeeds() {
        let h = Harness::new();
        h.transport.script(
            "q1",
            "A",
            vec![
                ScriptedTransport::status(500),
                ScriptedTransport::status(500),
                ScriptedTransport::ok("done", "A", Some(7)),
            ],
        );
        let (scheduler, store) = h.scheduler(policy(3)).await;

        let report = scheduler.run(h.jobs(&["q1"])).await;

        assert_eq!(report.rounds_run, 3);
        assert_eq!(report.stop_reason, None);
        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert!(records[0].outcome.is_success());
        assert_eq!(records[0].attempts, 3);
        assert_eq!(records[0].round, 2);
        // 第 1、2 轮前的冷却按轮次放大
        assert_eq!(
            h.delay.waits(),
            vec![Duration::from_secs(5), Duration::from_secs(10)]
        );
    }

    #[tokio::test]
    async fn test_last_round_failure_is_exhausted_once() {
        let h = Harness::new();
        h.transport.script("q1", "A", vec![ScriptedTransport::status(503)]);
        let (scheduler, store) = h.scheduler(policy(2)).await;

        scheduler.run(h.jobs(&["q1"])).await;

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome.failure_kind(), Some(FailureKind::Exhausted));
        assert_eq!(h.transport.call_count(), 2);
        let requeues = h
            .observer
            .events()
            .into_iter()
            .filter(|e| matches!(e, ProgressEvent::JobRequeued { .. }))
            .count();
        assert_eq!(requeues, 1);
    }

    #[tokio::test]
    async fn test_cancel_before_run_marks_all_cancelled() {
        let h = Harness::new();
        let (scheduler, store) = h.scheduler(policy(3)).await;
        h.stop.cancel();

        let report = scheduler.run(h.jobs(&["q1", "q2"])).await;

        assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(report.rounds_run, 0);
        assert_eq!(h.transport.call_count(), 0);
        let records = store.records().await;
        assert_eq!(records.len(), 2);
        assert!(records
            .iter()
            .all(|r| r.outcome.failure_kind() == Some(FailureKind::Cancelled)));
    }

    #[tokio::test]
    async fn test_fatal_marks_offender_auth_error_and_rest_cancelled() {
        let h = Harness::new();
        h.transport.script("q1", "A", vec![ScriptedTransport::status(401)]);
        h.transport.script("q2", "A", vec![ScriptedTransport::status(500)]);
        let (scheduler, store) = h.scheduler(policy(3)).await;

        let report = scheduler.run(h.jobs(&["q1", "q2"])).await;

        assert!(matches!(report.stop_reason, Some(StopReason::Aborted(_))));
        let records = store.records().await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome.failure_kind(), Some(FailureKind::AuthError));
        assert_eq!(records[1].outcome.failure_kind(), Some(FailureKind::Cancelled));
    }

    #[tokio::test]
    async fn test_cancel_mid_round_keeps_in_flight_result() {
        let h = Harness::new();
        h.transport
            .script("q1", "A", vec![ScriptedTransport::ok("one", "A", Some(3))]);
        let transport = Arc::new(CancellingTransport {
            inner: h.transport.clone(),
            stop: h.stop.clone(),
        });
        let (scheduler, store) = h.build(policy(3), transport, h.delay.clone(), 1).await;

        let report = scheduler.run(h.jobs(&["q1", "q2", "q3"])).await;

        assert_eq!(report.stop_reason, Some(StopReason::Cancelled));
        assert_eq!(report.rounds_run, 1);
        assert_eq!(h.transport.call_count(), 1);
        let records = store.records().await;
        assert_eq!(records.len(), 3);
        let q1 = records.iter().find(|r| r.job_id == "q1.png").unwrap();
        assert!(q1.outcome.is_success());
        assert!(h.output.path().join("q1_extracted.txt").is_file());
        for name in ["q2.png", "q3.png"] {
            let record = records.iter().find(|r| r.job_id == name).unwrap();
            assert_eq!(record.outcome.failure_kind(), Some(FailureKind::Cancelled));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_in_one_worker_holds_back_another() {
        let h = Harness::new();
        h.transport.script("q1", "A", vec![ScriptedTransport::status(429)]);
        h.transport.script(
            "q2",
            "A",
            vec![
                ScriptedTransport::status(500),
                ScriptedTransport::ok("two", "A", None),
            ],
        );
        let transport = Arc::new(TimedTransport {
            inner: h.transport.clone(),
            sent_at: std::sync::Mutex::new(Vec::new()),
        });
        let policy = RetryPolicy {
            max_rounds: 1,
            max_intra_round_retries: 1,
            backoff_base: Duration::from_secs(1),
            rate_limit_cooldown: Duration::from_secs(10),
            ..policy(1)
        };
        let (scheduler, store) = h
            .build(policy, transport.clone(), Arc::new(TokioDelay), 2)
            .await;
        let started = tokio::time::Instant::now();

        scheduler.run(h.jobs(&["q1", "q2"])).await;

        let records = store.records().await;
        let q1 = records.iter().find(|r| r.job_id == "q1.png").unwrap();
        let q2 = records.iter().find(|r| r.job_id == "q2.png").unwrap();
        assert_eq!(q1.outcome.failure_kind(), Some(FailureKind::Exhausted));
        assert!(q2.outcome.is_success());

        // q2 的退避只有 1 秒，但 q1 的 429 让它的重试等到冷却结束
        let sent_at = transport.sent_at.lock().unwrap().clone();
        assert_eq!(sent_at.len(), 3);
        assert!(sent_at[2].duration_since(started) >= Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_request_delay_only_between_consecutive_jobs() {
        let pacing = RetryPolicy {
            request_delay: Duration::from_secs(1),
            ..policy(1)
        };

        let single = Harness::new();
        single.transport.script("q1", "A", vec![ScriptedTransport::ok("one", "A", None)]);
        let (scheduler, _) = single
            .build(pacing.clone(), single.transport.clone(), single.delay.clone(), 1)
            .await;
        scheduler.run(single.jobs(&["q1"])).await;
        assert!(single.delay.waits().is_empty());

        let pair = Harness::new();
        pair.transport.script("q1", "A", vec![ScriptedTransport::ok("one", "A", None)]);
        pair.transport.script("q2", "A", vec![ScriptedTransport::ok("two", "A", None)]);
        let (scheduler, _) = pair
            .build(pacing, pair.transport.clone(), pair.delay.clone(), 1)
            .await;
        scheduler.run(pair.jobs(&["q1", "q2"])).await;
        assert_eq!(pair.delay.waits(), vec![Duration::from_secs(1)]);
    }
}
