use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable that overrides `[telegram] bot_token`.
pub const TOKEN_ENV_VAR: &str = "TELEGRAM_BOT_TOKEN";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub telegram: TelegramConfig,
    #[serde(default = "default_storage_config")]
    pub storage: StorageConfig,
    #[serde(default = "default_consumer_config")]
    pub consumer: ConsumerConfig,
    #[serde(default = "default_rate_limit_config")]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Long-poll timeout passed to getUpdates
    #[serde(default = "default_poll_timeout_secs")]
    pub poll_timeout_secs: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_db_path")]
    pub database_path: PathBuf,
    /// Set to false to skip fetching page titles on save
    #[serde(default = "default_true")]
    pub resolve_titles: bool,
    #[serde(default = "default_title_timeout_secs")]
    pub title_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ConsumerConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_idle_delay_ms")]
    pub idle_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default)]
    pub initial_offset: i64,
}

impl ConsumerConfig {
    pub fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimitConfig {
    #[serde(default = "default_burst_window_ms")]
    pub burst_window_ms: u64,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_idle_eviction_secs")]
    pub idle_eviction_secs: u64,
    /// Apply the limiter to URL submissions as well as commands
    #[serde(default)]
    pub limit_links: bool,
}

impl RateLimitConfig {
    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn idle_eviction(&self) -> Duration {
        Duration::from_secs(self.idle_eviction_secs)
    }
}

fn default_true() -> bool {
    true
}

fn default_poll_timeout_secs() -> u32 {
    10
}

fn default_db_path() -> PathBuf {
    PathBuf::from("randlink.db")
}

fn default_title_timeout_secs() -> u64 {
    7
}

fn default_batch_size() -> usize {
    100
}

fn default_idle_delay_ms() -> u64 {
    1000
}

fn default_retry_delay_ms() -> u64 {
    5000
}

fn default_burst_window_ms() -> u64 {
    500
}

fn default_cooldown_secs() -> u64 {
    10
}

fn default_idle_eviction_secs() -> u64 {
    600
}

fn default_storage_config() -> StorageConfig {
    StorageConfig {
        database_path: default_db_path(),
        resolve_titles: true,
        title_timeout_secs: default_title_timeout_secs(),
    }
}

fn default_consumer_config() -> ConsumerConfig {
    ConsumerConfig {
        batch_size: default_batch_size(),
        idle_delay_ms: default_idle_delay_ms(),
        retry_delay_ms: default_retry_delay_ms(),
        initial_offset: 0,
    }
}

fn default_rate_limit_config() -> RateLimitConfig {
    RateLimitConfig {
        burst_window_ms: default_burst_window_ms(),
        cooldown_secs: default_cooldown_secs(),
        idle_eviction_secs: default_idle_eviction_secs(),
        limit_links: false,
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let token_override = std::env::var(TOKEN_ENV_VAR).ok();
        Self::parse(&content, token_override)
    }

    /// Parse config text, applying an optional token override, and validate it.
    pub fn parse(content: &str, token_override: Option<String>) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).context("Failed to parse config file")?;

        if let Some(token) = token_override.filter(|t| !t.trim().is_empty()) {
            config.telegram.bot_token = token;
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.telegram.bot_token.trim().is_empty() {
            bail!(
                "Telegram bot token is not specified (set [telegram] bot_token or {})",
                TOKEN_ENV_VAR
            );
        }
        if self.consumer.batch_size == 0 {
            bail!("[consumer] batch_size must be at least 1");
        }
        if self.rate_limit.idle_eviction_secs == 0 {
            bail!("[rate_limit] idle_eviction_secs must be at least 1");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_gets_defaults() {
        let config = Config::parse("[telegram]\nbot_token = \"123:abc\"\n", None).unwrap();

        assert_eq!(config.telegram.bot_token, "123:abc");
        assert_eq!(config.telegram.poll_timeout_secs, 10);
        assert_eq!(config.storage.database_path, PathBuf::from("randlink.db"));
        assert!(config.storage.resolve_titles);
        assert_eq!(config.consumer.batch_size, 100);
        assert_eq!(config.consumer.initial_offset, 0);
        assert_eq!(config.consumer.idle_delay(), Duration::from_secs(1));
        assert_eq!(config.rate_limit.burst_window(), Duration::from_millis(500));
        assert_eq!(config.rate_limit.cooldown(), Duration::from_secs(10));
        assert!(!config.rate_limit.limit_links);
    }

    #[test]
    fn test_sections_override_defaults() {
        let content = r#"
            [telegram]
            bot_token = "t"

            [storage]
            database_path = "/var/lib/randlink/pages.db"
            resolve_titles = false

            [consumer]
            batch_size = 20
            retry_delay_ms = 250

            [rate_limit]
            cooldown_secs = 30
            limit_links = true
        "#;
        let config = Config::parse(content, None).unwrap();

        assert_eq!(
            config.storage.database_path,
            PathBuf::from("/var/lib/randlink/pages.db")
        );
        assert!(!config.storage.resolve_titles);
        assert_eq!(config.consumer.batch_size, 20);
        assert_eq!(config.consumer.retry_delay(), Duration::from_millis(250));
        assert_eq!(config.rate_limit.cooldown(), Duration::from_secs(30));
        assert_eq!(config.rate_limit.burst_window_ms, 500);
        assert!(config.rate_limit.limit_links);
    }

    #[test]
    fn test_missing_token_is_an_error() {
        let err = Config::parse("[telegram]\n", None).unwrap_err();
        assert!(err.to_string().contains("token is not specified"));
    }

    #[test]
    fn test_env_token_overrides_file() {
        let config =
            Config::parse("[telegram]\nbot_token = \"file\"\n", Some("env".to_string())).unwrap();
        assert_eq!(config.telegram.bot_token, "env");

        let config = Config::parse("[telegram]\n", Some("env-only".to_string())).unwrap();
        assert_eq!(config.telegram.bot_token, "env-only");
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let content = "[telegram]\nbot_token = \"t\"\n[consumer]\nbatch_size = 0\n";
        assert!(Config::parse(content, None).is_err());
    }
}
