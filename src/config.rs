// Engine configuration, loaded once from TOML and passed into constructors

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::core::Frequency;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    pub max_len: usize,
    pub max_pending_values: usize,
    pub frequencies: Vec<Frequency>,
    /// Recovered rows must carry this symbol when set.
    pub symbol: Option<String>,
    /// Empty or absent disables recovery replay.
    pub recovery_path: Option<PathBuf>,
    pub tolerate_symbol_mismatch: bool,
    pub allow_equal_timestamps: bool,
    pub use_adjusted_values: bool,
    pub day_bar_hook: bool,
    pub show_progress: bool,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_len: 250,
            max_pending_values: 10_000,
            frequencies: vec![Frequency::REALTIME],
            symbol: None,
            recovery_path: None,
            tolerate_symbol_mismatch: false,
            allow_equal_timestamps: true,
            use_adjusted_values: false,
            day_bar_hook: true,
            show_progress: false,
        }
    }
}

impl FeedConfig {
    pub fn recovery_path(&self) -> Option<&Path> {
        self.recovery_path
            .as_deref()
            .filter(|p| !p.as_os_str().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub failure_backoff_ms: u64,
    pub max_consecutive_failures: u32,
    pub channel_capacity: usize,
    pub idle_sleep_ms: u64,
    pub append_retry_ms: u64,
    pub straggler_timeout_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            failure_backoff_ms: 10_000,
            max_consecutive_failures: 20,
            channel_capacity: 100,
            idle_sleep_ms: 100,
            append_retry_ms: 1_000,
            straggler_timeout_ms: 2_000,
        }
    }
}

impl LiveConfig {
    pub fn failure_backoff(&self) -> Duration {
        Duration::from_millis(self.failure_backoff_ms)
    }

    pub fn idle_sleep(&self) -> Duration {
        Duration::from_millis(self.idle_sleep_ms)
    }

    pub fn append_retry(&self) -> Duration {
        Duration::from_millis(self.append_retry_ms)
    }

    pub fn straggler_timeout(&self) -> Duration {
        Duration::from_millis(self.straggler_timeout_ms)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Sleep after an idle iteration; 0 keeps the loop spinning.
    pub idle_backoff_ms: u64,
}

impl DispatcherConfig {
    pub fn idle_backoff(&self) -> Option<Duration> {
        (self.idle_backoff_ms > 0).then(|| Duration::from_millis(self.idle_backoff_ms))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DumpConfig {
    pub bar_log_path: Option<PathBuf>,
    pub remove_old_bars: bool,
    pub batch_size: usize,
}

impl Default for DumpConfig {
    fn default() -> Self {
        Self {
            bar_log_path: None,
            remove_old_bars: false,
            batch_size: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub with_target: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            with_target: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub feed: FeedConfig,
    pub live: LiveConfig,
    pub dispatcher: DispatcherConfig,
    pub dump: DumpConfig,
    pub logging: LoggingConfig,
}

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

impl EngineConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError::FileRead(e.to_string()))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        fs::write(path, content).map_err(|e| ConfigError::FileWrite(e.to_string()))?;
        Ok(())
    }

    /// Load configuration from file, or write and return the defaults
    pub fn load_or_create<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            let config = Self::default();
            config.to_file(&path)?;
            info!("📁 Created default config file: {}", path.as_ref().display());
            Ok(config)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.feed.max_len == 0 {
            return Err(ConfigError::Validation("feed.max_len must be greater than 0".to_string()));
        }

        if self.feed.max_pending_values == 0 {
            return Err(ConfigError::Validation(
                "feed.max_pending_values must be greater than 0".to_string(),
            ));
        }

        if self.feed.frequencies.is_empty() {
            return Err(ConfigError::Validation(
                "feed.frequencies must list at least one frequency".to_string(),
            ));
        }

        if let Some(freq) = self.feed.frequencies.iter().find(|f| f.is_sentinel()) {
            return Err(ConfigError::Validation(format!(
                "feed.frequencies contains reserved value {}",
                freq
            )));
        }

        if self.live.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "live.channel_capacity must be greater than 0".to_string(),
            ));
        }

        if self.dump.batch_size == 0 {
            return Err(ConfigError::Validation("dump.batch_size must be greater than 0".to_string()));
        }

        let level = self.logging.level.to_ascii_lowercase();
        if !LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level '{}' is not one of {:?}",
                self.logging.level, LOG_LEVELS
            )));
        }

        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(String),

    #[error("Failed to write config file: {0}")]
    FileWrite(String),

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.live.channel_capacity, 100);
        assert_eq!(config.live.failure_backoff(), Duration::from_secs(10));
        assert_eq!(config.dispatcher.idle_backoff(), None);
    }

    #[test]
    fn test_empty_recovery_path_disables_replay() {
        let mut feed = FeedConfig::default();
        assert!(feed.recovery_path().is_none());
        feed.recovery_path = Some(PathBuf::new());
        assert!(feed.recovery_path().is_none());
        feed.recovery_path = Some(PathBuf::from("bars.db"));
        assert_eq!(feed.recovery_path(), Some(Path::new("bars.db")));
    }

    #[test]
    fn test_rejects_sentinel_frequency() {
        let mut config = EngineConfig::default();
        config.feed.frequencies = vec![Frequency::MINUTE, Frequency::TRADE];
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }
}
