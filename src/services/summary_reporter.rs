//! 汇总报告 - 业务能力层
//!
//! 从结果存储的终态台账计算汇总，并写出 `summary_report.txt`。

use chrono::{DateTime, Local};
use std::path::PathBuf;
use tracing::info;

use crate::error::{AppError, AppResult};
use crate::models::outcome::FailureKind;
use crate::services::result_store::{ResultStore, TerminalRecord};

const RULE: &str = "================================================================================";
const THIN_RULE: &str = "--------------------------------------------------------------------------------";

/// 失败条目
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedItem {
    pub job_id: String,
    pub kind: FailureKind,
    pub message: String,
}

/// 运行汇总
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    /// 本次进入调度的任务数（不含跳过的）
    pub total_jobs: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// 所有成功结果的 total_tokens 之和
    pub token_total: u64,
    pub failed: Vec<FailedItem>,
    /// 因已有成功文件而跳过的任务数
    pub skipped_count: usize,
}

impl Summary {
    pub fn from_records(records: &[TerminalRecord], skipped_count: usize) -> Self {
        let mut summary = Summary {
            total_jobs: records.len(),
            skipped_count,
            ..Default::default()
        };

        for record in records {
            match record.outcome.failure_kind() {
                None => {
                    summary.success_count += 1;
                    summary.token_total += record.outcome.total_tokens().unwrap_or(0);
                }
                Some(kind) => {
                    summary.failure_count += 1;
                    summary.failed.push(FailedItem {
                        job_id: record.job_id.clone(),
                        kind,
                        message: record.outcome.message().to_string(),
                    });
                }
            }
        }

        summary
    }

    /// 成功率（百分比），没有任务时为 `None`
    pub fn success_rate(&self) -> Option<f64> {
        if self.total_jobs == 0 {
            None
        } else {
            Some(self.success_count as f64 / self.total_jobs as f64 * 100.0)
        }
    }

    /// 成功数 + 失败数是否等于总数
    pub fn is_reconciled(&self) -> bool {
        self.success_count + self.failure_count == self.total_jobs
    }

    pub fn failed_item(&self, job_id: &str) -> Option<&FailedItem> {
        self.failed.iter().find(|item| item.job_id == job_id)
    }
}

/// 汇总报告生成器
pub struct SummaryReporter;

impl SummaryReporter {
    /// 从结果存储收集汇总
    pub async fn collect(store: &ResultStore, skipped_count: usize) -> Summary {
        let records = store.records().await;
        Summary::from_records(&records, skipped_count)
    }

    /// 渲染报告文本
    pub fn render(summary: &Summary, generated_at: DateTime<Local>) -> String {
        let mut report = String::new();
        report.push_str("IMAGE TEXT EXTRACTION - SUMMARY REPORT\n");
        report.push_str(RULE);
        report.push_str("\n\n");
        report.push_str(&format!(
            "Generated: {}\n",
            generated_at.format("%Y-%m-%d %H:%M:%S")
        ));

        match summary.success_rate() {
            None => {
                report.push_str("Total images processed: 0\n");
                report.push_str("No images were processed in this run.\n");
                report.push_str(&format!(
                    "Skipped (already extracted): {}\n",
                    summary.skipped_count
                ));
                return report;
            }
            Some(rate) => {
                report.push_str(&format!("Total images processed: {}\n", summary.total_jobs));
                report.push_str(&format!("Successful: {}\n", summary.success_count));
                report.push_str(&format!("Failed: {}\n", summary.failure_count));
                report.push_str(&format!(
                    "Skipped (already extracted): {}\n",
                    summary.skipped_count
                ));
                report.push_str(&format!("Success rate: {:.1}%\n\n", rate));
            }
        }

        report.push_str(RULE);
        report.push_str("\n\n");

        if !summary.failed.is_empty() {
            report.push_str("FAILED IMAGES:\n");
            report.push_str(THIN_RULE);
            report.push('\n');
            for item in &summary.failed {
                report.push_str(&format!(
                    "- {} [{}]: {}\n",
                    item.job_id, item.kind, item.message
                ));
            }
            report.push('\n');
        }

        report.push_str(&format!(
            "Total tokens used: {}\n",
            format_thousands(summary.token_total)
        ));
        report
    }

    /// 写出 `summary_report.txt`
    pub async fn write(store: &ResultStore, summary: &Summary) -> AppResult<PathBuf> {
        let path = store.summary_path();
        let report = Self::render(summary, Local::now());

        tokio::fs::write(&path, report)
            .await
            .map_err(|e| AppError::file_write_failed(path.display().to_string(), e))?;

        info!("📊 汇总报告: {}", path.display());
        Ok(path)
    }
}

/// 千分位格式化：1234567 → "1,234,567"
pub fn format_thousands(value: u64) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}
