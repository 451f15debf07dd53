//! Configuration loader and validator for the marketplace watch bot.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub telegram: Telegram,
    pub marketplace: Marketplace,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Lower bound of the randomized pause between poll cycles.
    #[serde(default = "default_poll_min_seconds")]
    pub poll_min_seconds: u64,
    /// Upper bound (inclusive) of the randomized pause between poll cycles.
    #[serde(default = "default_poll_max_seconds")]
    pub poll_max_seconds: u64,
}

/// Telegram bot settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Telegram {
    pub bot_token: String,
    /// Users allowed to manage subscriptions. Empty means everyone.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
}

/// Marketplace search API settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Marketplace {
    #[serde(default = "default_per_page")]
    pub per_page: u32,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
    /// Overrides the scheme/host taken from each subscription URL.
    #[serde(default)]
    pub api_base: Option<String>,
}

fn default_poll_min_seconds() -> u64 {
    60
}

fn default_poll_max_seconds() -> u64 {
    120
}

fn default_per_page() -> u32 {
    20
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    15
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default SQLite URL inside the data directory.
    pub fn database_url(&self) -> String {
        format!("sqlite://{}/watchbot.db", self.app.data_dir.trim_end_matches('/'))
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let cfg: Config = serde_yaml::from_str(&content)?;
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.poll_min_seconds == 0 {
        return Err(ConfigError::Invalid("app.poll_min_seconds must be > 0"));
    }
    if cfg.app.poll_max_seconds < cfg.app.poll_min_seconds {
        return Err(ConfigError::Invalid(
            "app.poll_max_seconds must be >= app.poll_min_seconds",
        ));
    }

    if cfg.telegram.bot_token.trim().is_empty() {
        return Err(ConfigError::Invalid("telegram.bot_token must be non-empty"));
    }

    if cfg.marketplace.per_page == 0 {
        return Err(ConfigError::Invalid("marketplace.per_page must be > 0"));
    }
    if cfg.marketplace.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid(
            "marketplace.request_timeout_seconds must be > 0",
        ));
    }
    if let Some(base) = &cfg.marketplace.api_base {
        if reqwest::Url::parse(base).is_err() {
            return Err(ConfigError::Invalid("marketplace.api_base must be a valid URL"));
        }
    }

    Ok(())
}

/// Returns the documented example YAML content.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  poll_min_seconds: 60
  poll_max_seconds: 120

telegram:
  bot_token: "YOUR_TELEGRAM_BOT_TOKEN"
  allowed_users:
    - 123456789

marketplace:
  per_page: 20
  request_timeout_seconds: 15
"#
}
