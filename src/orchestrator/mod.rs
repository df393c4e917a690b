//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责批量处理和轮次调度，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `batch_processor` - 批量图片处理器
//! - 管理应用生命周期（初始化、运行）
//! - 扫描输入目录，跳过已完成的图片
//! - 写出汇总报告
//!
//! ### `round_scheduler` - 轮次调度器
//! - 轮内并发（Semaphore + tokio::spawn）
//! - 轮间冷却，失败任务重新入队
//! - 停止信号触发后收尾
//!
//! ## 层次关系
//!
//! ```text
//! batch_processor (处理 Vec<Job>)
//!     ↓
//! round_scheduler (按轮处理队列)
//!     ↓
//! workflow::ExtractFlow (单个 Job 的一轮)
//!     ↓
//! services (能力层：completion / retry policy / rate gate / store)
//!     ↓
//! clients + infrastructure (传输、编码、延时、停止信号)
//! ```

pub mod batch_processor;
pub mod round_scheduler;

// 重新导出主要类型
pub use batch_processor::App;
pub use round_scheduler::{RoundScheduler, RunReport};
