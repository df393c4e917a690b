use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, warn};

use image_text_extractor::config::{split_list, Config};
use image_text_extractor::utils::logging;
use image_text_extractor::App;

/// 批量从图片中提取文字
#[derive(Parser, Debug)]
#[command(name = "image_text_extractor", version, about)]
struct Cli {
    /// TOML 配置文件
    #[arg(long)]
    config: Option<PathBuf>,

    /// OpenRouter API key（也可用 OPENROUTER_API_KEY）
    #[arg(long)]
    api_key: Option<String>,

    /// 图片目录
    #[arg(long)]
    input_folder: Option<PathBuf>,

    /// 结果目录
    #[arg(long)]
    output_folder: Option<PathBuf>,

    /// 接受的扩展名，逗号分隔
    #[arg(long)]
    extensions: Option<String>,

    /// 提示词文件
    #[arg(long)]
    prompt_file: Option<PathBuf>,

    /// 候选模型，逗号分隔，按回退顺序
    #[arg(long)]
    models: Option<String>,

    /// 同一 worker 两张图之间的间隔（秒）
    #[arg(long)]
    delay: Option<f64>,

    /// 最大轮数
    #[arg(long)]
    max_retry_rounds: Option<usize>,

    /// 并发数
    #[arg(long)]
    workers: Option<usize>,

    /// 重新处理已有成功文件的图片
    #[arg(long)]
    no_skip_existing: bool,

    /// 显示详细日志
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn apply(self, mut config: Config) -> Config {
        if let Some(key) = self.api_key {
            config.api_key = key;
        }
        if let Some(folder) = self.input_folder {
            config.input_folder = folder;
        }
        if let Some(folder) = self.output_folder {
            config.output_folder = folder;
        }
        if let Some(extensions) = self.extensions {
            config.extensions = split_list(&extensions);
        }
        if let Some(prompt_file) = self.prompt_file {
            config.prompt_file = prompt_file;
        }
        if let Some(models) = self.models {
            config.models = split_list(&models);
        }
        if let Some(delay) = self.delay {
            config.request_delay_secs = delay;
        }
        if let Some(rounds) = self.max_retry_rounds {
            config.max_retry_rounds = rounds;
        }
        if let Some(workers) = self.workers {
            config.max_workers = workers;
        }
        if self.no_skip_existing {
            config.skip_existing = false;
        }
        if self.verbose {
            config.verbose_logging = true;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 加载配置
    let config = Config::load(cli.config.as_deref())?;
    let config = cli.apply(config);

    // 初始化日志
    logging::init(config.verbose_logging);

    // 初始化并运行应用
    let app = App::initialize(config).await?;

    let stop = app.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 收到 Ctrl-C，正在停止（进行中的请求会跑完）...");
            stop.cancel();
        }
    });

    if let Err(e) = app.run().await {
        error!("❌ {:#}", e);
        return Err(e);
    }

    Ok(())
}
