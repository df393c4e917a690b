//! 结果存储 - 业务能力层
//!
//! 负责把每个任务的终态写成文件，并记下本次运行的终态台账：
//! - 成功：`<stem>_extracted.txt`（元数据头 + 提取内容）
//! - 失败：`<stem>_error.txt`（失败类型、信息、轮数）
//! - 汇总：`summary_report.txt`（由 `SummaryReporter` 写入）
//!
//! 同一任务只记录一次；跳过已完成模式下已有的成功文件不会被改写。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult};
use crate::models::job::Job;
use crate::models::outcome::{ExtractionOutcome, FailureKind};

const RULE: &str = "================================================================================";

/// 一个任务的终态记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerminalRecord {
    pub job_id: String,
    pub source: PathBuf,
    pub ordinal: usize,
    pub outcome: ExtractionOutcome,
    /// 终态所在轮次（从 0 开始）
    pub round: usize,
    pub attempts: usize,
}

/// 持久化结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistStatus {
    /// 写入了新文件
    Written,
    /// 文件或台账里已有记录，未做改动
    AlreadyPresent,
}

/// 结果存储
pub struct ResultStore {
    output_dir: PathBuf,
    /// 为 `true` 时重新提取成功的任务会覆盖旧的成功文件
    overwrite: bool,
    ledger: Mutex<Vec<TerminalRecord>>,
}

impl ResultStore {
    /// 打开（必要时创建）输出目录
    pub async fn open(output_dir: impl Into<PathBuf>, overwrite: bool) -> AppResult<Self> {
        let output_dir = output_dir.into();
        tokio::fs::create_dir_all(&output_dir)
            .await
            .map_err(|e| AppError::file_write_failed(output_dir.display().to_string(), e))?;

        Ok(Self {
            output_dir,
            overwrite,
            ledger: Mutex::new(Vec::new()),
        })
    }

    pub fn success_path(&self, job: &Job) -> PathBuf {
        self.output_dir.join(format!("{}_extracted.txt", job.stem()))
    }

    pub fn error_path(&self, job: &Job) -> PathBuf {
        self.output_dir.join(format!("{}_error.txt", job.stem()))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.output_dir.join("summary_report.txt")
    }

    /// 是否已有成功产物（空文件不算）
    pub fn has_success(&self, job: &Job) -> bool {
        std::fs::metadata(self.success_path(job))
            .map(|meta| meta.is_file() && meta.len() > 0)
            .unwrap_or(false)
    }

    /// 记录任务终态并写文件
    ///
    /// 成功结果只有在成功文件落盘后才记为成功；写入失败时改记 `PersistError`，
    /// 同时尽量写出失败文件，并把写入错误返回给调用方。
    pub async fn persist(&self, job: &Job, outcome: &ExtractionOutcome) -> AppResult<PersistStatus> {
        let mut ledger = self.ledger.lock().await;

        if ledger.iter().any(|record| record.source == job.source) {
            warn!("{} 已有终态记录，忽略重复写入", job);
            return Ok(PersistStatus::AlreadyPresent);
        }

        let record = |outcome: &ExtractionOutcome| TerminalRecord {
            job_id: job.id(),
            source: job.source.clone(),
            ordinal: job.ordinal,
            outcome: outcome.clone(),
            round: job.round,
            attempts: job.attempt_count(),
        };

        match outcome {
            ExtractionOutcome::Success { .. } => match self.write_success(job, outcome).await {
                Ok(status) => {
                    ledger.push(record(outcome));
                    Ok(status)
                }
                Err(e) => {
                    let fallback =
                        ExtractionOutcome::failure(FailureKind::PersistError, e.to_string());
                    ledger.push(record(&fallback));
                    if let Err(err) = self.write_error(job, &fallback).await {
                        warn!("{} 失败文件也没能写入: {}", job, err);
                    }
                    Err(e)
                }
            },
            ExtractionOutcome::Failure { .. } => {
                ledger.push(record(outcome));
                self.write_error(job, outcome).await
            }
        }
    }

    /// 本次运行的终态台账（按序号排列）
    pub async fn records(&self) -> Vec<TerminalRecord> {
        let mut records = self.ledger.lock().await.clone();
        records.sort_by_key(|r| r.ordinal);
        records
    }

    /// 先写临时文件，再链接（不覆盖）或改名（覆盖）到最终位置
    async fn write_success(&self, job: &Job, outcome: &ExtractionOutcome) -> AppResult<PersistStatus> {
        let path = self.success_path(job);
        let tmp = temp_path(&path);

        let result = self.place_success(job, &path, &tmp, render_success(job, outcome)).await;
        match tokio::fs::remove_file(&tmp).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => warn!("无法删除临时文件 {}: {}", tmp.display(), e),
        }
        let status = result?;

        if status == PersistStatus::Written {
            // 之前运行留下的失败文件已经过时
            let stale = self.error_path(job);
            match tokio::fs::remove_file(&stale).await {
                Ok(()) => debug!("删除过时的失败文件: {}", stale.display()),
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!("无法删除过时的失败文件 {}: {}", stale.display(), e),
            }
        }

        Ok(status)
    }

    async fn place_success(
        &self,
        job: &Job,
        path: &Path,
        tmp: &Path,
        content: String,
    ) -> AppResult<PersistStatus> {
        if !self.overwrite && self.has_success(job) {
            warn!("{} 成功文件已存在，保留原文件: {}", job, path.display());
            return Ok(PersistStatus::AlreadyPresent);
        }

        let write_failed = |e| AppError::file_write_failed(tmp.display().to_string(), e);
        let mut file = tokio::fs::File::create(tmp).await.map_err(write_failed)?;
        file.write_all(content.as_bytes()).await.map_err(write_failed)?;
        file.sync_all().await.map_err(write_failed)?;
        drop(file);

        // 空的成功文件是之前中断留下的，可以替换
        let replace = self.overwrite || path.is_file();
        if replace {
            tokio::fs::rename(tmp, path)
                .await
                .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
            return Ok(PersistStatus::Written);
        }

        match tokio::fs::hard_link(tmp, path).await {
            Ok(()) => Ok(PersistStatus::Written),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                warn!("{} 成功文件已存在，保留原文件: {}", job, path.display());
                Ok(PersistStatus::AlreadyPresent)
            }
            Err(e) => Err(AppError::file_write_failed(path.display().to_string(), e)),
        }
    }

    async fn write_error(&self, job: &Job, outcome: &ExtractionOutcome) -> AppResult<PersistStatus> {
        let path = self.error_path(job);
        tokio::fs::write(&path, render_error(job, outcome))
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;
        Ok(PersistStatus::Written)
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".tmp");
    PathBuf::from(name)
}

/// 成功文件内容
pub fn render_success(job: &Job, outcome: &ExtractionOutcome) -> String {
    let (text, model) = match outcome {
        ExtractionOutcome::Success {
            text, model_used, ..
        } => (text.as_str(), model_used.as_str()),
        ExtractionOutcome::Failure { .. } => ("", "N/A"),
    };
    let tokens = outcome
        .total_tokens()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "Image: {}\nModel: {}\nRetry Round: {}\nAttempts: {}\n{}\n\n{}\n\n{}\nTokens used: {}\n",
        job.id(),
        model,
        job.round + 1,
        job.attempt_count(),
        RULE,
        text,
        RULE,
        tokens
    )
}

/// 失败文件内容
pub fn render_error(job: &Job, outcome: &ExtractionOutcome) -> String {
    let kind = outcome
        .failure_kind()
        .map(|k| k.to_string())
        .unwrap_or_else(|| "N/A".to_string());

    format!(
        "Image: {}\nError: {}\nError Type: {}\nRetry Rounds: {}\nAttempts: {}\n",
        job.id(),
        outcome.message(),
        kind,
        job.rounds_attempted(),
        job.attempt_count()
    )
}
