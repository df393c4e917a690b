//! 批量图片处理器 - 编排层
//!
//! ## 职责
//!
//! 本模块是整个应用的入口，负责一次批量提取的完整生命周期。
//!
//! ## 核心功能
//!
//! 1. **应用初始化**：校验配置、读取提示词、创建 HTTP 传输
//! 2. **批量加载**：扫描输入目录，按自然顺序得到任务列表
//! 3. **跳过已完成**：已有成功文件的图片不进入调度
//! 4. **向下委托**：交给 `RoundScheduler` 跑完所有轮次
//! 5. **全局统计**：写出汇总报告，致命中止时返回错误

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::clients::{HttpTransport, VisionTransport};
use crate::config::Config;
use crate::error::AppError;
use crate::infrastructure::delay::{Delay, TokioDelay};
use crate::infrastructure::stop_signal::{StopReason, StopSignal};
use crate::models::job::Job;
use crate::models::loaders::discover_jobs;
use crate::orchestrator::round_scheduler::RoundScheduler;
use crate::services::completion_client::CompletionClient;
use crate::services::result_store::ResultStore;
use crate::services::summary_reporter::{Summary, SummaryReporter};
use crate::utils::logging;
use crate::workflow::events::{ProgressEvent, ProgressObserver, TracingObserver};
use crate::workflow::extract_flow::ExtractFlow;

/// 应用主结构
pub struct App {
    config: Config,
    prompt: String,
    transport: Arc<dyn VisionTransport>,
    delay: Arc<dyn Delay>,
    observer: Arc<dyn ProgressObserver>,
    stop: StopSignal,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;
        if let Some(warning) = config.api_key_warning() {
            warn!("⚠️ {}", warning);
        }

        logging::log_startup(&config);

        let prompt = config.load_prompt().await;
        let transport = HttpTransport::new(
            config.api_base_url.clone(),
            config.api_key.clone(),
            config.request_timeout(),
        )
        .context("创建 HTTP 客户端失败")?;

        Ok(Self::with_parts(
            config,
            prompt,
            Arc::new(transport),
            Arc::new(TokioDelay),
            Arc::new(TracingObserver),
        ))
    }

    /// 用给定的部件组装应用
    pub fn with_parts(
        config: Config,
        prompt: impl Into<String>,
        transport: Arc<dyn VisionTransport>,
        delay: Arc<dyn Delay>,
        observer: Arc<dyn ProgressObserver>,
    ) -> Self {
        Self {
            config,
            prompt: prompt.into(),
            transport,
            delay,
            observer,
            stop: StopSignal::new(),
        }
    }

    /// 本次运行的停止信号，可交给 Ctrl-C 处理器
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<Summary> {
        let roster = self.config.roster()?;
        let policy = self.config.retry_policy();

        let jobs = self.load_jobs().await?;
        let store = Arc::new(
            ResultStore::open(&self.config.output_folder, !self.config.skip_existing)
                .await
                .context("无法打开输出目录")?,
        );

        let (pending, skipped) = self.partition(jobs, &store);
        if pending.is_empty() {
            warn!("⚠️ 没有需要处理的图片");
        }

        self.observer.on_event(&ProgressEvent::RunStarted {
            total_jobs: pending.len(),
            skipped,
            max_rounds: policy.max_rounds,
            models: roster.iter().map(str::to_string).collect(),
        });

        let client = CompletionClient::new(
            self.transport.clone(),
            Some(self.config.temperature),
            Some(self.config.max_tokens),
        );
        let flow = ExtractFlow::new(
            client,
            roster,
            self.prompt.clone(),
            policy,
            self.delay.clone(),
            self.observer.clone(),
        );
        let scheduler = RoundScheduler::new(
            flow,
            store.clone(),
            self.delay.clone(),
            self.observer.clone(),
            self.stop.clone(),
            self.config.max_workers,
        );

        let report = scheduler.run(pending).await;

        // 中止和取消也要写汇总
        let summary = SummaryReporter::collect(&store, skipped).await;
        let report_path = SummaryReporter::write(&store, &summary)
            .await
            .context("写入汇总报告失败")?;
        logging::print_final_stats(&summary, &report_path);

        if !summary.is_reconciled() || summary.total_jobs != report.total_jobs {
            warn!(
                "⚠️ 汇总与调度不一致: 调度 {} 个，记录 {} 个",
                report.total_jobs, summary.total_jobs
            );
        }

        match report.stop_reason {
            Some(StopReason::Aborted(message)) => Err(AppError::Aborted(message).into()),
            Some(StopReason::Cancelled) => {
                warn!("🛑 运行已被取消");
                Ok(summary)
            }
            None => Ok(summary),
        }
    }

    /// 加载任务
    async fn load_jobs(&self) -> Result<Vec<Job>> {
        info!("\n📁 正在扫描待处理的图片...");
        let jobs = discover_jobs(&self.config.input_folder, &self.config.extensions)
            .await
            .with_context(|| format!("无法扫描输入目录 {}", self.config.input_folder.display()))?;
        info!("✓ 找到 {} 张图片", jobs.len());
        Ok(jobs)
    }

    /// 按是否已有成功文件拆分任务，返回（待处理, 跳过数）
    fn partition(&self, jobs: Vec<Job>, store: &ResultStore) -> (Vec<Job>, usize) {
        if !self.config.skip_existing {
            return (jobs, 0);
        }
        let (done, pending): (Vec<Job>, Vec<Job>) =
            jobs.into_iter().partition(|job| store.has_success(job));
        (pending, done.len())
    }
}
