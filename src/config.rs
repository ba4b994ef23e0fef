//! Configuration loading and validation

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// Re-export detector thresholds so callers configure them in one place
pub use crate::signals::engine::DetectorConfig;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub ingestion: IngestionConfig,
    #[serde(default)]
    pub signals: SignalsConfig,
    #[serde(default)]
    pub profiler: ProfilerConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file
    #[serde(default = "default_database_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_database_path() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IngestionConfig {
    #[serde(default = "default_markets_url")]
    pub markets_url: String,
    #[serde(default = "default_trades_url")]
    pub trades_url: String,
    /// How often the active-market set is refreshed
    #[serde(default = "default_markets_refresh_seconds")]
    pub markets_refresh_seconds: u64,
    /// Jittered per-market poll interval bounds
    #[serde(default = "default_poll_min_seconds")]
    pub poll_min_seconds: u64,
    #[serde(default = "default_poll_max_seconds")]
    pub poll_max_seconds: u64,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_ingestion_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
    #[serde(default = "default_client_timeout_seconds")]
    pub client_timeout_seconds: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            markets_url: default_markets_url(),
            trades_url: default_trades_url(),
            markets_refresh_seconds: default_markets_refresh_seconds(),
            poll_min_seconds: default_poll_min_seconds(),
            poll_max_seconds: default_poll_max_seconds(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_max_seconds: default_ingestion_backoff_max_seconds(),
            client_timeout_seconds: default_client_timeout_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalsConfig {
    /// Trades pulled per batch, strictly after the cursor
    #[serde(default = "default_signal_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_signal_idle_seconds")]
    pub idle_seconds: u64,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_signal_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
    #[serde(default)]
    pub detectors: DetectorConfig,
}

impl Default for SignalsConfig {
    fn default() -> Self {
        Self {
            batch_size: default_signal_batch_size(),
            idle_seconds: default_signal_idle_seconds(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_max_seconds: default_signal_backoff_max_seconds(),
            detectors: DetectorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfilerConfig {
    #[serde(default = "default_profiler_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_profiler_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_profiler_error_sleep_seconds")]
    pub error_sleep_seconds: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_profiler_interval_seconds(),
            batch_size: default_profiler_batch_size(),
            error_sleep_seconds: default_profiler_error_sleep_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Aggregation window over recent signals
    #[serde(default = "default_scoring_window_hours")]
    pub window_hours: u64,
    #[serde(default = "default_scoring_idle_seconds")]
    pub idle_seconds: u64,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_scoring_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            window_hours: default_scoring_window_hours(),
            idle_seconds: default_scoring_idle_seconds(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_max_seconds: default_scoring_backoff_max_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NotifierConfig {
    /// Telegram bot token; absent means dry-run
    #[serde(default)]
    pub telegram_bot_token: Option<String>,
    /// Telegram chat id; absent means dry-run
    #[serde(default)]
    pub telegram_chat_id: Option<String>,
    /// Log messages instead of sending them even when credentials exist
    #[serde(default = "default_true")]
    pub dry_run: bool,
    #[serde(default = "default_notifier_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_notifier_idle_seconds")]
    pub idle_seconds: u64,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_notifier_backoff_max_seconds")]
    pub backoff_max_seconds: u64,
}

impl Default for NotifierConfig {
    fn default() -> Self {
        Self {
            telegram_bot_token: None,
            telegram_chat_id: None,
            dry_run: true,
            batch_size: default_notifier_batch_size(),
            idle_seconds: default_notifier_idle_seconds(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_max_seconds: default_notifier_backoff_max_seconds(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "json" or "plain"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_log_level(), format: default_log_format() }
    }
}

// Default value functions
fn default_database_path() -> String {
    std::env::var("POLYWATCH_DB").unwrap_or_else(|_| "polywatch.db".into())
}

fn default_markets_url() -> String {
    "https://gamma-api.polymarket.com/events?active=true&closed=false&limit=100&order=volume24hr&ascending=false".into()
}

fn default_trades_url() -> String {
    "https://data-api.polymarket.com/trades".into()
}

fn default_markets_refresh_seconds() -> u64 {
    600
}

fn default_poll_min_seconds() -> u64 {
    30
}

fn default_poll_max_seconds() -> u64 {
    60
}

fn default_backoff_base_seconds() -> u64 {
    5
}

fn default_ingestion_backoff_max_seconds() -> u64 {
    300
}

fn default_client_timeout_seconds() -> u64 {
    10
}

fn default_signal_batch_size() -> usize {
    200
}

fn default_signal_idle_seconds() -> u64 {
    5
}

fn default_signal_backoff_max_seconds() -> u64 {
    120
}

fn default_profiler_interval_seconds() -> u64 {
    300
}

fn default_profiler_batch_size() -> usize {
    100
}

fn default_profiler_error_sleep_seconds() -> u64 {
    60
}

fn default_scoring_window_hours() -> u64 {
    2
}

fn default_scoring_idle_seconds() -> u64 {
    10
}

fn default_scoring_backoff_max_seconds() -> u64 {
    180
}

fn default_notifier_batch_size() -> usize {
    50
}

fn default_notifier_idle_seconds() -> u64 {
    15
}

fn default_notifier_backoff_max_seconds() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file and environment variables
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        let settings = config::Config::builder()
            // Load from file if exists
            .add_source(config::File::from(path).required(false))
            // Override with environment variables (prefix POLYWATCH_)
            .add_source(
                config::Environment::with_prefix("POLYWATCH")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values; bad config is fatal at startup
    fn validate(&self) -> Result<()> {
        if self.database.path.is_empty() {
            anyhow::bail!("database.path must not be empty");
        }

        if self.ingestion.markets_url.is_empty() || self.ingestion.trades_url.is_empty() {
            anyhow::bail!("ingestion markets_url and trades_url must not be empty");
        }

        if self.ingestion.poll_min_seconds > self.ingestion.poll_max_seconds {
            anyhow::bail!(
                "poll_min_seconds ({}) must not exceed poll_max_seconds ({})",
                self.ingestion.poll_min_seconds,
                self.ingestion.poll_max_seconds
            );
        }

        if self.ingestion.client_timeout_seconds == 0 {
            anyhow::bail!("client_timeout_seconds must be positive");
        }

        if self.signals.batch_size == 0 {
            anyhow::bail!("signals.batch_size must be positive");
        }

        if self.scoring.window_hours == 0 {
            anyhow::bail!("scoring.window_hours must be positive");
        }

        if self.notifier.batch_size == 0 {
            anyhow::bail!("notifier.batch_size must be positive");
        }

        Ok(())
    }

    /// Whether the notifier has a usable chat transport configured
    pub fn notifier_configured(&self) -> bool {
        self.notifier.telegram_bot_token.is_some() && self.notifier.telegram_chat_id.is_some()
    }

    /// Get masked configuration for display (hide secrets)
    pub fn masked_display(&self) -> String {
        format!(
            r#"Configuration:
  Database:
    path: {}
  Ingestion:
    markets_url: {}
    trades_url: {}
    refresh: {}s
    poll interval: {}-{}s
    client timeout: {}s
  Signals:
    batch_size: {}
  Profiler:
    interval: {}s
  Scoring:
    window: {}h
  Notifier:
    token: {}
    chat_id: {}
    dry_run: {}
"#,
            self.database.path,
            mask_url(&self.ingestion.markets_url),
            mask_url(&self.ingestion.trades_url),
            self.ingestion.markets_refresh_seconds,
            self.ingestion.poll_min_seconds,
            self.ingestion.poll_max_seconds,
            self.ingestion.client_timeout_seconds,
            self.signals.batch_size,
            self.profiler.interval_seconds,
            self.scoring.window_hours,
            if self.notifier.telegram_bot_token.is_some() { "***" } else { "(not set)" },
            self.notifier.telegram_chat_id.as_deref().unwrap_or("(not set)"),
            self.notifier.dry_run,
        )
    }
}

/// Mask URL for display (hide API keys in query params)
fn mask_url(url: &str) -> String {
    if let Some(idx) = url.find('?') {
        format!("{}?***", &url[..idx])
    } else {
        url.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.signals.batch_size, 200);
        assert_eq!(config.scoring.window_hours, 2);
        assert!(config.notifier.dry_run);
        assert!(!config.notifier_configured());
    }

    #[test]
    fn test_validate_rejects_inverted_poll_bounds() {
        let mut config = Config::default();
        config.ingestion.poll_min_seconds = 120;
        config.ingestion.poll_max_seconds = 30;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_mask_url() {
        assert_eq!(
            mask_url("https://api.example.com?key=secret"),
            "https://api.example.com?***"
        );
        assert_eq!(mask_url("https://api.example.com"), "https://api.example.com");
    }
}
