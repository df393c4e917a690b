/// 日志工具模块
///
/// 负责安装 tracing 订阅器，并提供日志格式化和输出的辅助函数
use std::path::Path;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::services::summary_reporter::{format_thousands, Summary};

/// 初始化日志
///
/// 设置了 `RUST_LOG` 时以它为准；否则默认 `info`，详细模式下为 `debug`。
/// 重复调用不会报错。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量图片文字提取");
    info!("📂 输入目录: {}", config.input_folder.display());
    info!("📂 输出目录: {}", config.output_folder.display());
    info!("📊 最大并发数: {}", config.max_workers);
    info!("{}", "=".repeat(60));
}

/// 记录轮次开始信息
///
/// # 参数
/// - `round`: 轮次（从 0 开始）
/// - `queued`: 本轮任务数
pub fn log_round_start(round: usize, queued: usize) {
    info!("\n{}", "=".repeat(60));
    if round == 0 {
        info!("📦 开始第 1 轮: {} 张图片", queued);
    } else {
        info!("🔄 开始第 {} 轮（重试）: {} 张图片", round + 1, queued);
    }
    info!("{}", "=".repeat(60));
}

/// 记录轮次完成信息
pub fn log_round_complete(round: usize, resolved: usize, requeued: usize) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {} 轮完成: 结束 {}，待重试 {}",
        round + 1,
        resolved,
        requeued
    );
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `summary`: 运行汇总
/// - `report_path`: 汇总报告路径
pub fn print_final_stats(summary: &Summary, report_path: &Path) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", summary.success_count, summary.total_jobs);
    info!("❌ 失败: {}", summary.failure_count);
    if summary.skipped_count > 0 {
        info!("⏭️ 跳过: {}", summary.skipped_count);
    }
    info!("🔢 Token 用量: {}", format_thousands(summary.token_total));
    info!("{}", "=".repeat(60));
    info!("\n汇总报告已保存至: {}", report_path.display());
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度（按字符计）
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("一二三四五", 3), "一二三...");
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init(false);
        init(true);
    }
}
