use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AppError, AppResult, ConfigError};
use crate::models::roster::ModelRoster;
use crate::services::retry_policy::RetryPolicy;

/// 提示词文件不存在或为空时使用的提示词
pub const DEFAULT_PROMPT: &str = "Extract all text from this image.";

/// 程序配置
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    // --- 服务配置 ---
    pub api_key: String,
    pub api_base_url: String,
    /// 候选模型，按回退优先级排列
    pub models: Vec<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// 单次请求超时（秒）
    pub request_timeout_secs: u64,

    // --- 输入输出 ---
    /// 图片目录
    pub input_folder: PathBuf,
    /// 结果目录
    pub output_folder: PathBuf,
    /// 接受的扩展名（不区分大小写）
    pub extensions: Vec<String>,
    /// 提示词文件
    pub prompt_file: PathBuf,
    /// 已有成功文件的图片是否跳过
    pub skip_existing: bool,

    // --- 调度 ---
    pub max_retry_rounds: usize,
    pub max_intra_round_retries: u32,
    pub max_workers: usize,
    pub backoff_base_secs: f64,
    pub max_backoff_secs: f64,
    pub rate_limit_cooldown_secs: f64,
    pub model_switch_delay_secs: f64,
    pub round_cooldown_secs: f64,
    /// 同一 worker 两张图之间的间隔（秒）
    pub request_delay_secs: f64,

    /// 是否显示详细日志
    pub verbose_logging: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            api_base_url: "https://openrouter.ai/api/v1/chat/completions".to_string(),
            models: vec!["google/gemini-2.0-flash-001".to_string()],
            temperature: 0.3,
            max_tokens: 4000,
            request_timeout_secs: 120,
            input_folder: PathBuf::from("images"),
            output_folder: PathBuf::from("extracted_texts"),
            extensions: ["jpg", "jpeg", "png", "gif", "webp", "bmp"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            prompt_file: PathBuf::from("temp_prompt.txt"),
            skip_existing: true,
            max_retry_rounds: 3,
            max_intra_round_retries: 2,
            max_workers: 4,
            backoff_base_secs: 2.0,
            max_backoff_secs: 60.0,
            rate_limit_cooldown_secs: 2.0,
            model_switch_delay_secs: 1.0,
            round_cooldown_secs: 5.0,
            request_delay_secs: 1.0,
            verbose_logging: false,
        }
    }
}

impl Config {
    /// 默认值 + 可选的 TOML 文件 + 环境变量
    pub fn load(path: Option<&Path>) -> AppResult<Self> {
        match path {
            Some(path) => Self::from_file(path)?.with_env(),
            None => Self::from_env(),
        }
    }

    /// 从 TOML 文件读取，缺失的字段使用默认值
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::file_read_failed(path.display().to_string(), e))?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::TomlParseFailed {
            path: path.display().to_string(),
            source,
        })?;
        debug!("已读取配置文件: {}", path.display());
        Ok(config)
    }

    /// 默认值 + 环境变量
    pub fn from_env() -> AppResult<Self> {
        Self::default().with_env()
    }

    /// 用环境变量覆盖已有配置
    pub fn with_env(mut self) -> AppResult<Self> {
        if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
            self.api_key = key;
        }
        if let Ok(url) = std::env::var("OPENROUTER_API_URL") {
            self.api_base_url = url;
        }
        if let Ok(models) = std::env::var("EXTRACTOR_MODELS") {
            self.models = split_list(&models);
        }
        if let Ok(folder) = std::env::var("INPUT_FOLDER") {
            self.input_folder = PathBuf::from(folder);
        }
        if let Ok(folder) = std::env::var("OUTPUT_FOLDER") {
            self.output_folder = PathBuf::from(folder);
        }
        self.max_retry_rounds = env_parse("MAX_RETRY_ROUNDS", "usize", self.max_retry_rounds)?;
        self.max_workers = env_parse("MAX_WORKERS", "usize", self.max_workers)?;
        self.verbose_logging = env_parse("VERBOSE_LOGGING", "bool", self.verbose_logging)?;
        Ok(self)
    }

    /// 检查配置是否可用
    pub fn validate(&self) -> AppResult<()> {
        if self.api_key.trim().is_empty() {
            return Err(AppError::Auth(
                "未提供 API key，请使用 --api-key 或设置 OPENROUTER_API_KEY".to_string(),
            ));
        }
        if self.max_retry_rounds == 0 {
            return Err(AppError::invalid_config("max_retry_rounds", "至少为 1"));
        }
        if self.max_workers == 0 {
            return Err(AppError::invalid_config("max_workers", "至少为 1"));
        }
        if self.extensions.is_empty() {
            return Err(AppError::invalid_config("extensions", "不能为空"));
        }
        for (field, value) in self.delay_fields() {
            secs(value).map_err(|reason| AppError::invalid_config(field, reason))?;
        }
        self.roster()?;
        Ok(())
    }

    /// key 格式不像 OpenRouter 的 key 时给出提示（不阻止运行）
    pub fn api_key_warning(&self) -> Option<String> {
        if self.api_key.trim().starts_with("sk-or-") {
            None
        } else {
            Some("API key 不是以 'sk-or-' 开头，可能不是有效的 OpenRouter key".to_string())
        }
    }

    pub fn roster(&self) -> AppResult<ModelRoster> {
        ModelRoster::new(self.models.iter())
    }

    fn delay_fields(&self) -> [(&'static str, f64); 6] {
        [
            ("backoff_base_secs", self.backoff_base_secs),
            ("max_backoff_secs", self.max_backoff_secs),
            ("rate_limit_cooldown_secs", self.rate_limit_cooldown_secs),
            ("model_switch_delay_secs", self.model_switch_delay_secs),
            ("round_cooldown_secs", self.round_cooldown_secs),
            ("request_delay_secs", self.request_delay_secs),
        ]
    }

    /// 转换为重试策略；不合法的时长（`validate` 会拒绝）按 0 处理
    pub fn retry_policy(&self) -> RetryPolicy {
        let duration = |value: f64| secs(value).unwrap_or(Duration::ZERO);
        RetryPolicy {
            max_rounds: self.max_retry_rounds,
            max_intra_round_retries: self.max_intra_round_retries,
            backoff_base: duration(self.backoff_base_secs),
            max_backoff: duration(self.max_backoff_secs),
            rate_limit_cooldown: duration(self.rate_limit_cooldown_secs),
            model_switch_delay: duration(self.model_switch_delay_secs),
            round_cooldown: duration(self.round_cooldown_secs),
            request_delay: duration(self.request_delay_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// 读取提示词文件；不存在、读不出或为空时用默认提示词
    pub async fn load_prompt(&self) -> String {
        match tokio::fs::read_to_string(&self.prompt_file).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => {
                warn!("⚠️ 提示词文件为空，使用默认提示词");
                DEFAULT_PROMPT.to_string()
            }
            Err(_) => {
                debug!("未找到提示词文件 {}，使用默认提示词", self.prompt_file.display());
                DEFAULT_PROMPT.to_string()
            }
        }
    }
}

/// 逗号分隔的列表
pub fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_parse<T: FromStr>(var_name: &str, expected_type: &str, default: T) -> AppResult<T> {
    match std::env::var(var_name) {
        Ok(value) => value.trim().parse().map_err(|_| {
            ConfigError::EnvVarParseFailed {
                var_name: var_name.to_string(),
                value,
                expected_type: expected_type.to_string(),
            }
            .into()
        }),
        Err(_) => Ok(default),
    }
}

fn secs(value: f64) -> Result<Duration, String> {
    Duration::try_from_secs_f64(value).map_err(|e| format!("{} 秒不是合法的时长: {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "api_key = \"sk-or-test\"\nmodels = [\"a\", \"b\"]\nmax_workers = 8\nrequest_delay_secs = 0.5"
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();

        assert_eq!(config.api_key, "sk-or-test");
        assert_eq!(config.models, vec!["a", "b"]);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.max_retry_rounds, 3);
        assert_eq!(config.retry_policy().request_delay, Duration::from_millis(500));
        assert!(config.api_key_warning().is_none());
    }

    #[test]
    fn test_bad_toml_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max_workers = \"many\"").unwrap();

        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::TomlParseFailed { .. })
        ));
    }

    #[test]
    fn test_validate() {
        let missing_key = Config::default();
        assert!(matches!(missing_key.validate(), Err(AppError::Auth(_))));

        let config = Config {
            api_key: "plain-key".to_string(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        assert!(config.api_key_warning().is_some());

        let no_models = Config {
            models: vec![" ".to_string()],
            ..config.clone()
        };
        assert!(no_models.validate().is_err());

        let no_rounds = Config {
            max_retry_rounds: 0,
            ..config
        };
        assert!(no_rounds.validate().is_err());
    }

    #[test]
    fn test_out_of_range_delay_is_rejected() {
        let config = Config {
            api_key: "sk-or-test".to_string(),
            round_cooldown_secs: 1e20,
            ..Default::default()
        };

        let err = config.validate().unwrap_err();
        assert!(matches!(
            err,
            AppError::Config(ConfigError::Invalid { ref field, .. }) if field == "round_cooldown_secs"
        ));
        assert_eq!(config.retry_policy().round_cooldown, Duration::ZERO);

        let negative = Config {
            request_delay_secs: -1.0,
            round_cooldown_secs: 5.0,
            ..config
        };
        assert!(negative.validate().is_err());
    }

    #[test]
    fn test_default_policy_matches_config() {
        let policy = Config::default().retry_policy();
        assert_eq!(policy, RetryPolicy::default());
    }

    #[test]
    fn test_split_list() {
        assert_eq!(split_list("a, b,,c "), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_prompt_falls_back_to_default() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config {
            prompt_file: dir.path().join("absent.txt"),
            ..Default::default()
        };
        assert_eq!(config.load_prompt().await, DEFAULT_PROMPT);

        let path = dir.path().join("prompt.txt");
        std::fs::write(&path, "  Read the question.\n").unwrap();
        config.prompt_file = path;
        assert_eq!(config.load_prompt().await, "Read the question.");
    }
}
