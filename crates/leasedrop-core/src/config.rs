//! Configuration management for lease retrieval.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main application configuration.
///
/// This is loaded from `~/.config/leasedrop/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Browser automation settings
    pub browser: BrowserConfig,
    /// Anti-automation challenge handling
    pub challenge: ChallengeConfig,
    /// Retry and backoff behavior
    pub retry: RetryConfig,
    /// History database and diagnostics locations
    pub storage: StorageConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    /// Load configuration from an explicit path, falling back to defaults if
    /// the file does not exist.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        if path.exists() {
            tracing::debug!("Loading config from {}", path.display());
            let contents = fs::read_to_string(path)?;
            let config: Self = toml::from_str(&contents)?;
            config.validate()?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `LEASEDROP_HEADLESS`: Override browser headless mode (true/false)
    /// - `LEASEDROP_MAX_ATTEMPTS`: Override retry attempt limit
    /// - `LEASEDROP_DB_PATH`: Override history database path
    /// - `LEASEDROP_DIAGNOSTICS_DIR`: Override diagnostics directory
    pub fn load_with_env(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(path) => Self::load_from(path)?,
            None => Self::load()?,
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Apply overrides from an environment lookup function.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("LEASEDROP_HEADLESS") {
            if let Ok(headless) = val.parse() {
                self.browser.headless = headless;
                tracing::debug!("Override browser.headless from env: {}", headless);
            }
        }

        if let Some(val) = lookup("LEASEDROP_MAX_ATTEMPTS") {
            if let Ok(attempts) = val.parse() {
                self.retry.max_attempts = attempts;
                tracing::debug!("Override retry.max_attempts from env: {}", attempts);
            }
        }

        if let Some(val) = lookup("LEASEDROP_DB_PATH") {
            tracing::debug!("Override storage.database_path from env: {}", val);
            self.storage.database_path = Some(PathBuf::from(val));
        }

        if let Some(val) = lookup("LEASEDROP_DIAGNOSTICS_DIR") {
            tracing::debug!("Override storage.diagnostics_dir from env: {}", val);
            self.storage.diagnostics_dir = Some(PathBuf::from(val));
        }
    }

    /// Reject values that would make the retrieval pipeline unusable.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "retry.max_delay_ms".to_string(),
                reason: "must not be smaller than retry.base_delay_ms".to_string(),
            });
        }
        if self.retry.attempt_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "retry.attempt_timeout_secs".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.challenge.settle_multiplier == 0 {
            return Err(ConfigError::InvalidValue {
                field: "challenge.settle_multiplier".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.challenge.max_settle_cycles == 0 {
            return Err(ConfigError::InvalidValue {
                field: "challenge.max_settle_cycles".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.browser.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "browser.poll_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/leasedrop/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/leasedrop`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        Ok(Self::project_dirs()?.data_dir().to_path_buf())
    }

    /// Resolved history database path.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("lease_drop.db")),
        }
    }

    /// Resolved diagnostics directory.
    pub fn diagnostics_dir(&self) -> ConfigResult<PathBuf> {
        match &self.storage.diagnostics_dir {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("diagnostics")),
        }
    }

    fn project_dirs() -> ConfigResult<ProjectDirs> {
        ProjectDirs::from("com", "leasedrop", "leasedrop").ok_or(ConfigError::NoConfigDir)
    }
}

/// Browser automation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    /// Run browser in headless mode
    pub headless: bool,
    /// Browser window width
    pub window_width: u32,
    /// Browser window height
    pub window_height: u32,
    /// Page load settle timeout in seconds
    pub navigation_timeout_secs: u64,
    /// Standard wait for an element to become clickable, in milliseconds
    pub interactive_wait_ms: u64,
    /// Interval between condition polls, in milliseconds
    pub poll_interval_ms: u64,
    /// Explicit Chrome/Chromium executable; autodetected when unset
    pub executable: Option<PathBuf>,
}

impl BrowserConfig {
    /// Navigation timeout as a `Duration`.
    #[must_use]
    pub fn navigation_timeout(&self) -> Duration {
        Duration::from_secs(self.navigation_timeout_secs)
    }

    /// Interactive wait as a `Duration`.
    #[must_use]
    pub fn interactive_wait(&self) -> Duration {
        Duration::from_millis(self.interactive_wait_ms)
    }

    /// Poll interval as a `Duration`.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window_width: 1366,
            window_height: 768,
            navigation_timeout_secs: 30,
            interactive_wait_ms: 5_000,
            poll_interval_ms: 250,
            executable: None,
        }
    }
}

/// Anti-automation challenge handling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengeConfig {
    /// Extended settle-wait as a multiple of the interactive wait
    pub settle_multiplier: u32,
    /// Number of inspect/settle cycles before giving up
    pub max_settle_cycles: u32,
}

impl ChallengeConfig {
    /// Extended settle-wait derived from the interactive wait.
    #[must_use]
    pub fn settle_wait(&self, interactive_wait: Duration) -> Duration {
        interactive_wait * self.settle_multiplier
    }
}

impl Default for ChallengeConfig {
    fn default() -> Self {
        Self {
            settle_multiplier: 8,
            max_settle_cycles: 3,
        }
    }
}

/// Retry and backoff settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum pipeline runs per query
    pub max_attempts: u32,
    /// Delay before the second attempt, in milliseconds
    pub base_delay_ms: u64,
    /// Upper bound on any single backoff delay, in milliseconds
    pub max_delay_ms: u64,
    /// Wall-clock ceiling for one attempt, in seconds
    pub attempt_timeout_secs: u64,
}

impl RetryConfig {
    /// Backoff delay to wait after the given 1-based failed attempt.
    ///
    /// Doubles from `base_delay_ms` and saturates at `max_delay_ms`.
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Attempt ceiling as a `Duration`.
    #[must_use]
    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_secs(self.attempt_timeout_secs)
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 2_000,
            max_delay_ms: 30_000,
            attempt_timeout_secs: 300,
        }
    }
}

/// Storage locations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// History database file; defaults to the XDG data directory
    pub database_path: Option<PathBuf>,
    /// Directory receiving diagnostic snapshots
    pub diagnostics_dir: Option<PathBuf>,
    /// Optional TOML file overriding the built-in portal definition
    pub portal_definition: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.browser.headless);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.challenge.settle_multiplier, 8);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settle_wait_is_multiple_of_interactive_wait() {
        let config = AppConfig::default();
        let settle = config
            .challenge
            .settle_wait(config.browser.interactive_wait());
        assert_eq!(settle, Duration::from_secs(40));
        assert!(settle >= config.browser.interactive_wait() * 5);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let retry = RetryConfig {
            max_attempts: 6,
            base_delay_ms: 1_000,
            max_delay_ms: 5_000,
            attempt_timeout_secs: 60,
        };
        assert_eq!(retry.backoff_for(1), Duration::from_millis(1_000));
        assert_eq!(retry.backoff_for(2), Duration::from_millis(2_000));
        assert_eq!(retry.backoff_for(3), Duration::from_millis(4_000));
        assert_eq!(retry.backoff_for(4), Duration::from_millis(5_000));
        assert_eq!(retry.backoff_for(40), Duration::from_millis(5_000));
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.retry.max_attempts = 5;
        config.browser.headless = false;

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded = AppConfig::load_from(&config_path).expect("load config");
        assert_eq!(loaded.retry.max_attempts, 5);
        assert!(!loaded.browser.headless);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let tmp = TempDir::new().expect("create temp dir");
        let loaded = AppConfig::load_from(&tmp.path().join("absent.toml")).expect("load");
        assert_eq!(loaded.retry.max_attempts, 3);
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[retry]
max_attempts = 2

[challenge]
max_settle_cycles = 5
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.challenge.max_settle_cycles, 5);
        assert_eq!(config.retry.base_delay_ms, 2_000);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("LEASEDROP_HEADLESS", "false"),
            ("LEASEDROP_MAX_ATTEMPTS", "4"),
            ("LEASEDROP_DB_PATH", "/tmp/history.db"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config.apply_env_overrides(|key| env.get(key).map(ToString::to_string));

        assert!(!config.browser.headless);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(
            config.database_path().expect("db path"),
            PathBuf::from("/tmp/history.db")
        );
        assert!(config.storage.diagnostics_dir.is_none());
    }

    #[test]
    fn test_zero_timeout_and_multiplier_rejected() {
        let mut config = AppConfig::default();
        config.retry.attempt_timeout_secs = 0;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "retry.attempt_timeout_secs");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }

        let mut config = AppConfig::default();
        config.challenge.settle_multiplier = 0;
        match config.validate() {
            Err(ConfigError::InvalidValue { field, .. }) => {
                assert_eq!(field, "challenge.settle_multiplier");
            }
            other => panic!("expected InvalidValue, got {other:?}"),
        }
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let mut config = AppConfig::default();
        config.retry.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
