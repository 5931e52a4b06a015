//! Configuration loading — TOML file with environment variable overrides.
//!
//! Looks for `mimic.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use mimic_app::scheduler::SchedulerConfig;
use mimic_domain::device::DeviceDescriptor;
use mimic_domain::error::ValidationError;
use mimic_domain::tracking_key::TrackingKey;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Database settings.
    pub database: DatabaseConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Scheduler tunables.
    pub scheduler: SchedulerSection,
    /// Replay flags forced at startup.
    pub replay: ReplayConfig,
    /// Devices to track at startup, on top of the persisted ones.
    pub track: Vec<TrackConfig>,
}

/// `SQLite` database configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` connection URL or file path.
    pub url: String,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SchedulerSection {
    pub poll_interval_secs: u64,
    pub sweep_interval_secs: u64,
    pub queue_capacity: usize,
}

/// Overrides of the persisted replay flags. Unset fields keep the
/// persisted value.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub enabled: Option<bool>,
    pub test_mode: Option<bool>,
}

/// One `[[track]]` entry.
#[derive(Debug, Deserialize)]
pub struct TrackConfig {
    pub device_id: String,
    #[serde(default = "TrackConfig::default_capability")]
    pub capability: String,
    pub name: Option<String>,
}

impl TrackConfig {
    fn default_capability() -> String {
        "onoff".to_string()
    }

    /// Build the descriptor handed to the scheduler.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError`] if the device id or capability is blank.
    pub fn descriptor(&self) -> Result<DeviceDescriptor, ValidationError> {
        let key = TrackingKey::new(self.device_id.clone(), self.capability.clone())?;
        let name = self.name.clone().unwrap_or_else(|| key.to_string());
        Ok(DeviceDescriptor::new(key, name))
    }
}

impl Config {
    /// Load configuration from `mimic.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// resulting configuration is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("mimic.toml")?;
        config.apply_env_overrides(|name| std::env::var(name).ok());
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(val) = var("MIMIC_DATABASE_URL") {
            self.database.url = val;
        }
        if let Some(val) = var("MIMIC_LOG") {
            self.logging.filter = val;
        }
        if let Some(val) = var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Some(enabled) = var("MIMIC_REPLAY").as_deref().and_then(parse_flag) {
            self.replay.enabled = Some(enabled);
        }
        if let Some(enabled) = var("MIMIC_TEST_MODE").as_deref().and_then(parse_flag) {
            self.replay.test_mode = Some(enabled);
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.scheduler.poll_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "poll_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.scheduler.sweep_interval_secs == 0 {
            return Err(ConfigError::Validation(
                "sweep_interval_secs must be non-zero".to_string(),
            ));
        }
        if self.scheduler.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "queue_capacity must be non-zero".to_string(),
            ));
        }
        for entry in &self.track {
            entry.descriptor().map_err(|err| {
                ConfigError::Validation(format!("invalid [[track]] entry: {err}"))
            })?;
        }
        Ok(())
    }

    /// Return the database URL in `sqlx`-compatible format.
    #[must_use]
    pub fn database_url(&self) -> &str {
        &self.database.url
    }

    #[must_use]
    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            poll_interval: Duration::from_secs(self.scheduler.poll_interval_secs),
            sweep_interval: Duration::from_secs(self.scheduler.sweep_interval_secs),
            queue_capacity: self.scheduler.queue_capacity,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:mimic.db?mode=rwc".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "mimicd=info,mimic_app=info".to_string(),
        }
    }
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 300,
            sweep_interval_secs: 86_400,
            queue_capacity: 256,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_produce_sensible_defaults() {
        let config = Config::default();
        assert_eq!(config.database.url, "sqlite:mimic.db?mode=rwc");
        assert_eq!(config.scheduler.poll_interval_secs, 300);
        assert_eq!(config.scheduler.sweep_interval_secs, 86_400);
        assert_eq!(config.scheduler.queue_capacity, 256);
        assert!(config.replay.enabled.is_none());
        assert!(config.track.is_empty());
    }

    #[test]
    fn should_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.scheduler.queue_capacity, 256);
    }

    #[test]
    fn should_parse_full_toml() {
        let toml = "
            [database]
            url = 'sqlite:test.db'

            [logging]
            filter = 'debug'

            [scheduler]
            poll_interval_secs = 60
            sweep_interval_secs = 3600
            queue_capacity = 32

            [replay]
            enabled = true
            test_mode = true

            [[track]]
            device_id = 'virtual_light'
            name = 'Living room'

            [[track]]
            device_id = 'virtual_switch'
            capability = 'channel_2'
        ";
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.database.url, "sqlite:test.db");
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.scheduler.poll_interval_secs, 60);
        assert_eq!(config.replay.enabled, Some(true));
        assert_eq!(config.replay.test_mode, Some(true));
        assert_eq!(config.track.len(), 2);
        assert_eq!(config.track[0].capability, "onoff");
        assert_eq!(config.track[1].capability, "channel_2");
    }

    #[test]
    fn should_return_default_when_file_not_found() {
        let config = Config::from_file("nonexistent.toml").unwrap();
        assert_eq!(config.scheduler.poll_interval_secs, 300);
    }

    #[test]
    fn should_apply_env_overrides() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "MIMIC_DATABASE_URL" => Some("sqlite::memory:".to_string()),
            "MIMIC_LOG" => Some("debug".to_string()),
            "MIMIC_REPLAY" => Some("on".to_string()),
            "MIMIC_TEST_MODE" => Some("0".to_string()),
            _ => None,
        });
        assert_eq!(config.database_url(), "sqlite::memory:");
        assert_eq!(config.logging.filter, "debug");
        assert_eq!(config.replay.enabled, Some(true));
        assert_eq!(config.replay.test_mode, Some(false));
    }

    #[test]
    fn should_prefer_rust_log_over_mimic_log() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| match name {
            "MIMIC_LOG" => Some("debug".to_string()),
            "RUST_LOG" => Some("trace".to_string()),
            _ => None,
        });
        assert_eq!(config.logging.filter, "trace");
    }

    #[test]
    fn should_ignore_unparsable_replay_flag() {
        let mut config = Config::default();
        config.apply_env_overrides(|name| (name == "MIMIC_REPLAY").then(|| "maybe".to_string()));
        assert!(config.replay.enabled.is_none());
    }

    #[test]
    fn should_reject_zero_poll_interval() {
        let mut config = Config::default();
        config.scheduler.poll_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn should_reject_blank_track_entry() {
        let config: Config = toml::from_str(
            "
            [[track]]
            device_id = ' '
        ",
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn should_ignore_unknown_sections() {
        let config: Config = toml::from_str("[virtual]\nenabled = false\n").unwrap();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn should_accept_defaults() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn should_name_track_entry_after_key_when_unnamed() {
        let entry = TrackConfig {
            device_id: "virtual_plug".to_string(),
            capability: "onoff".to_string(),
            name: None,
        };
        assert_eq!(entry.descriptor().unwrap().display_name, "virtual_plug/onoff");
    }

    #[test]
    fn should_convert_to_scheduler_config() {
        let config = Config::default();
        let scheduler = config.scheduler_config();
        assert_eq!(scheduler.poll_interval, Duration::from_secs(300));
        assert_eq!(scheduler.queue_capacity, 256);
    }

    #[test]
    fn should_report_parse_error_for_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("invalid {{{");
        assert!(result.is_err());
    }
}
