//! 任务模型
//!
//! 一个 `Job` 对应一张图片，从发现开始一直跟踪到终态。

use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::outcome::Classification;

/// 单次网络尝试的记录（只追加）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    /// 轮次（从 0 开始）
    pub round: usize,
    /// 请求的模型
    pub model: String,
    pub classification: Classification,
    pub latency: Duration,
    /// 失败信息
    pub message: Option<String>,
}

/// 单张图片的提取任务
#[derive(Debug, Clone)]
pub struct Job {
    /// 源文件路径，任务的唯一标识
    pub source: PathBuf,
    /// 自然排序后的序号
    pub ordinal: usize,
    /// 当前轮次
    pub round: usize,
    attempts: Vec<AttemptRecord>,
}

impl Job {
    pub fn new(source: impl Into<PathBuf>, ordinal: usize) -> Self {
        Self {
            source: source.into(),
            ordinal,
            round: 0,
            attempts: Vec::new(),
        }
    }

    /// 任务 ID（文件名）
    pub fn id(&self) -> String {
        self.source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.source.to_string_lossy().to_string())
    }

    /// 不带扩展名的文件名，用于产物命名
    pub fn stem(&self) -> String {
        self.source
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.id())
    }

    pub fn path(&self) -> &Path {
        &self.source
    }

    pub fn record(&mut self, record: AttemptRecord) {
        self.attempts.push(record);
    }

    pub fn attempts(&self) -> &[AttemptRecord] {
        &self.attempts
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.len()
    }

    /// 已经跑过的轮数（当前轮算在内）
    pub fn rounds_attempted(&self) -> usize {
        self.round + 1
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[#{} {}]", self.ordinal + 1, self.id())
    }
}
