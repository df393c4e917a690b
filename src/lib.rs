//! # Image Text Extractor
//!
//! 批量调用视觉模型，从图片中提取文字的 Rust 应用程序
//!
//! ## 架构设计
//!
//! 本系统采用分层架构：
//!
//! ### ① 基础设施层（Infrastructure / Clients）
//! - `infrastructure/` - 图片编码、可取消的延时、停止信号
//! - `clients/` - OpenAI 兼容的请求格式和 HTTP 传输
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"，只处理单次请求或单个结果
//! - `CompletionClient` - 发一次提取请求并归类结果
//! - `RetryPolicy` - 状态码归类和重试决策
//! - `RateGate` - 限流后的全局暂停
//! - `ResultStore` / `SummaryReporter` - 结果文件和汇总报告
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一张图在一轮里"的完整处理流程
//! - `ExtractFlow` - 模型回退、同模型重试、致命中止
//! - `ProgressEvent` - 结构化进度事件
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/batch_processor` - 应用入口，扫描、跳过、汇总
//! - `orchestrator/round_scheduler` - 多轮调度和并发控制
//!
//! ## 模块结构

pub mod clients;
pub mod config;
pub mod error;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::Config;
pub use error::{AppError, AppResult};
pub use infrastructure::{StopReason, StopSignal};
pub use models::{ExtractionOutcome, FailureKind, Job, ModelRoster};
pub use orchestrator::App;
pub use services::{RetryPolicy, Summary};
pub use workflow::{ExtractFlow, ProgressEvent, ProgressObserver, RoundVerdict};
