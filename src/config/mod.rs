use crate::global;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub calendar: CalendarConfig,
    pub http: HttpConfig,
    pub webhook: WebhookConfig,
    pub scheduler: SchedulerConfig,
    pub analysis: AnalysisConfig,
    pub database: DatabaseConfig,
}

/// Recording provider ("bot") API settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    /// Display name the bot joins calls with.
    pub bot_name: String,
    /// Public URL the provider should deliver bot webhooks to, if any.
    pub webhook_url: Option<String>,
}

/// OAuth client credentials used to exchange refresh tokens for access tokens.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CalendarConfig {
    pub google_client_id: String,
    pub google_client_secret: String,
    pub microsoft_client_id: String,
    pub microsoft_client_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    /// Total attempts per call, initial try included.
    pub retry_attempts: usize,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    pub listen_addr: String,
    pub verify_signatures: bool,
    pub secret: String,
    pub idempotency_ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub bot_sync_interval_seconds: u64,
    pub calendar_sync_interval_seconds: u64,
    pub auto_schedule_interval_seconds: u64,
    pub auto_schedule_enabled: bool,
    /// How far ahead auto-scheduling looks for meetings without a bot.
    pub auto_schedule_horizon_hours: i64,
    pub purge_interval_seconds: u64,
    /// How often meetings stuck waiting for transcript analysis are retried.
    pub analysis_retry_interval_seconds: u64,
    /// Per-item budget inside a batch; an item over budget is skipped.
    pub item_timeout_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Base URL of the transcript analysis service. Analysis is skipped when unset.
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: Option<PathBuf>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.meetingbaas.com".to_string(),
            api_key: String::new(),
            bot_name: "Meeting Notetaker".to_string(),
            webhook_url: None,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 250,
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:4747".to_string(),
            verify_signatures: true,
            secret: String::new(),
            idempotency_ttl_seconds: 24 * 3600,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            bot_sync_interval_seconds: 120,
            calendar_sync_interval_seconds: 300,
            auto_schedule_interval_seconds: 600,
            auto_schedule_enabled: false,
            auto_schedule_horizon_hours: 24,
            purge_interval_seconds: 3600,
            analysis_retry_interval_seconds: 600,
            item_timeout_seconds: 60,
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}

impl WebhookConfig {
    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_seconds)
    }
}

impl SchedulerConfig {
    pub fn bot_sync_interval(&self) -> Duration {
        Duration::from_secs(self.bot_sync_interval_seconds.max(1))
    }

    pub fn calendar_sync_interval(&self) -> Duration {
        Duration::from_secs(self.calendar_sync_interval_seconds.max(1))
    }

    pub fn auto_schedule_interval(&self) -> Duration {
        Duration::from_secs(self.auto_schedule_interval_seconds.max(1))
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_seconds.max(1))
    }

    pub fn analysis_retry_interval(&self) -> Duration {
        Duration::from_secs(self.analysis_retry_interval_seconds.max(1))
    }

    pub fn item_timeout(&self) -> Duration {
        Duration::from_secs(self.item_timeout_seconds.max(1))
    }
}

impl Config {
    /// Load the config file (creating it with defaults when missing) and
    /// apply `MEETSYNC_*` environment overrides.
    pub fn load() -> Result<Self> {
        let config_path = global::config_file()?;
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            info!(
                "Config file not found, creating default at {:?}",
                config_path
            );
            let config = Self::default();
            config.save_to(config_path)?;
            return Ok(config);
        }

        let content =
            std::fs::read_to_string(config_path).context("Failed to read config file")?;

        let config: Self = toml::from_str(&content).context("Failed to parse config file")?;

        info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(config_path, content).context("Failed to write config file")?;

        Ok(())
    }

    /// Resolved SQLite path: explicit setting first, then the data dir default.
    pub fn database_path(&self) -> Result<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => global::db_file(),
        }
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("MEETSYNC_PROVIDER_URL") {
            self.provider.base_url = url;
        }
        if let Some(key) = lookup("MEETSYNC_PROVIDER_API_KEY") {
            self.provider.api_key = key;
        }
        if let Some(id) = lookup("MEETSYNC_GOOGLE_CLIENT_ID") {
            self.calendar.google_client_id = id;
        }
        if let Some(secret) = lookup("MEETSYNC_GOOGLE_CLIENT_SECRET") {
            self.calendar.google_client_secret = secret;
        }
        if let Some(id) = lookup("MEETSYNC_MICROSOFT_CLIENT_ID") {
            self.calendar.microsoft_client_id = id;
        }
        if let Some(secret) = lookup("MEETSYNC_MICROSOFT_CLIENT_SECRET") {
            self.calendar.microsoft_client_secret = secret;
        }
        if let Some(raw) = lookup("MEETSYNC_RETRY_ATTEMPTS") {
            match raw.parse::<usize>() {
                Ok(attempts) => self.http.retry_attempts = attempts.max(1),
                Err(_) => warn!("Ignoring invalid MEETSYNC_RETRY_ATTEMPTS={raw}"),
            }
        }
        if let Some(addr) = lookup("MEETSYNC_LISTEN_ADDR") {
            self.webhook.listen_addr = addr;
        }
        if let Some(raw) = lookup("MEETSYNC_VERIFY_SIGNATURES") {
            self.webhook.verify_signatures = parse_flag(&raw);
        }
        if let Some(secret) = lookup("MEETSYNC_WEBHOOK_SECRET") {
            self.webhook.secret = secret;
        }
        if let Some(raw) = lookup("MEETSYNC_AUTO_SCHEDULE") {
            self.scheduler.auto_schedule_enabled = parse_flag(&raw);
        }
        if let Some(url) = lookup("MEETSYNC_ANALYSIS_URL") {
            self.analysis.endpoint = Some(url);
        }
        if let Some(path) = lookup("MEETSYNC_DB") {
            self.database.path = Some(PathBuf::from(path));
        }
    }
}

fn parse_flag(raw: &str) -> bool {
    raw == "1" || raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_match_documented_intervals() {
        let config = Config::default();
        assert_eq!(config.scheduler.bot_sync_interval(), Duration::from_secs(120));
        assert_eq!(
            config.scheduler.calendar_sync_interval(),
            Duration::from_secs(300)
        );
        assert_eq!(
            config.scheduler.auto_schedule_interval(),
            Duration::from_secs(600)
        );
        assert!(!config.scheduler.auto_schedule_enabled);
        assert_eq!(
            config.scheduler.analysis_retry_interval(),
            Duration::from_secs(600)
        );
        assert_eq!(config.webhook.idempotency_ttl(), Duration::from_secs(86400));
        assert!(config.webhook.verify_signatures);
        assert_eq!(config.http.retry_attempts, 3);
    }

    #[test]
    fn test_load_creates_default_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.provider.base_url, "https://api.meetingbaas.com");
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[scheduler]\nbot_sync_interval_seconds = 30\n\n[webhook]\nverify_signatures = false\n",
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.scheduler.bot_sync_interval_seconds, 30);
        assert_eq!(config.scheduler.calendar_sync_interval_seconds, 300);
        assert!(!config.webhook.verify_signatures);
        assert_eq!(config.webhook.listen_addr, "127.0.0.1:4747");
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("MEETSYNC_PROVIDER_API_KEY", "secret-key"),
            ("MEETSYNC_VERIFY_SIGNATURES", "false"),
            ("MEETSYNC_AUTO_SCHEDULE", "1"),
            ("MEETSYNC_RETRY_ATTEMPTS", "not-a-number"),
            ("MEETSYNC_DB", "/tmp/meetsync-test.db"),
        ]);

        let mut config = Config::default();
        config.apply_env_overrides(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(config.provider.api_key, "secret-key");
        assert!(!config.webhook.verify_signatures);
        assert!(config.scheduler.auto_schedule_enabled);
        assert_eq!(config.http.retry_attempts, 3);
        assert_eq!(
            config.database_path().unwrap(),
            PathBuf::from("/tmp/meetsync-test.db")
        );
    }
}
