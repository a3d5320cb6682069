use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::types::{ProviderId, Severity, SourceMode};

/// Configuration validation errors
#[derive(Debug, Clone)]
pub struct ConfigValidationError {
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Result of config validation
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub errors: Vec<ConfigValidationError>,
    pub warnings: Vec<ConfigValidationError>,
}

impl ValidationResult {
    /// Returns true if there are no errors (warnings are OK)
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Add an error
    pub fn add_error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Add a warning
    pub fn add_warning(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.warnings.push(ConfigValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Get a user-friendly message summarizing all errors
    pub fn error_summary(&self) -> String {
        if self.errors.is_empty() {
            return String::new();
        }
        self.errors
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimbusConfig {
    /// Application configuration directory
    pub config_dir: PathBuf,

    /// Snapshot cache settings
    #[serde(default)]
    pub cache: CacheConfig,

    /// Provider/source selection settings
    #[serde(default)]
    pub sources: SourceConfig,

    /// Alert notification settings
    #[serde(default)]
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Soft freshness bound in seconds; within this age a cached snapshot
    /// is served with no refresh.
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,

    /// Hard cutoff in seconds; entries older than this are never served.
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,

    /// Database filename inside the config directory.
    #[serde(default = "default_cache_file")]
    pub db_file: String,
}

fn default_ttl_secs() -> u64 {
    300
}

fn default_max_age_secs() -> u64 {
    10_800
}

fn default_cache_file() -> String {
    "snapshot_cache.db".to_string()
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            max_age_secs: default_max_age_secs(),
            db_file: default_cache_file(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.max_age_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Provider selection mode
    #[serde(default)]
    pub mode: SourceMode,

    /// Per-request connect/read timeout in seconds
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum retry attempts per provider call
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Maximum concurrent connections in the shared HTTP pool
    #[serde(default = "default_pool_max_idle")]
    pub pool_max_idle_per_host: usize,

    /// API key for the timeline provider (optional; provider is skipped
    /// in auto mode when absent)
    #[serde(default)]
    pub timeline_api_key: Option<String>,
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_max_retries() -> u32 {
    2
}

fn default_pool_max_idle() -> usize {
    4
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            mode: SourceMode::Auto,
            request_timeout_secs: default_request_timeout_secs(),
            max_retries: default_max_retries(),
            pool_max_idle_per_host: default_pool_max_idle(),
            timeline_api_key: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    /// Severities that produce notifications at all
    #[serde(default = "default_enabled_severities")]
    pub enabled_severities: BTreeSet<Severity>,

    /// Severities that bypass global cooldown and the hourly cap
    #[serde(default = "default_escalation_severities")]
    pub escalation_severities: BTreeSet<Severity>,

    /// Minimum seconds between any two notifications
    #[serde(default = "default_global_cooldown_secs")]
    pub global_cooldown_secs: u64,

    /// Minimum seconds between notifications for the same alert id
    #[serde(default = "default_per_alert_cooldown_secs")]
    pub per_alert_cooldown_secs: u64,

    /// Per-alert cooldown used instead for escalation severities
    #[serde(default = "default_escalation_cooldown_secs")]
    pub escalation_cooldown_secs: u64,

    /// Maximum notifications per sliding hour (non-escalation)
    #[serde(default = "default_hourly_cap")]
    pub hourly_cap: usize,

    /// Maximum retained notification history entries
    #[serde(default = "default_history_bound")]
    pub history_bound: usize,
}

fn default_enabled_severities() -> BTreeSet<Severity> {
    BTreeSet::from([Severity::Moderate, Severity::Severe, Severity::Extreme])
}

fn default_escalation_severities() -> BTreeSet<Severity> {
    BTreeSet::from([Severity::Extreme])
}

fn default_global_cooldown_secs() -> u64 {
    300
}

fn default_per_alert_cooldown_secs() -> u64 {
    3_600
}

fn default_escalation_cooldown_secs() -> u64 {
    900
}

fn default_hourly_cap() -> usize {
    10
}

fn default_history_bound() -> usize {
    500
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled_severities: default_enabled_severities(),
            escalation_severities: default_escalation_severities(),
            global_cooldown_secs: default_global_cooldown_secs(),
            per_alert_cooldown_secs: default_per_alert_cooldown_secs(),
            escalation_cooldown_secs: default_escalation_cooldown_secs(),
            hourly_cap: default_hourly_cap(),
            history_bound: default_history_bound(),
        }
    }
}

impl Default for NimbusConfig {
    fn default() -> Self {
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("nimbus");

        Self {
            config_dir,
            cache: CacheConfig::default(),
            sources: SourceConfig::default(),
            alerts: AlertConfig::default(),
        }
    }
}

impl NimbusConfig {
    /// Load configuration from file, creating default if it doesn't exist
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents =
            std::fs::read_to_string(&config_path).context("Failed to read config file")?;

        let config: NimbusConfig =
            toml::from_str(&contents).context("Failed to parse config file")?;

        Ok(config)
    }

    /// Load configuration and validate it
    ///
    /// Returns the config along with any validation warnings.
    /// Returns an error if validation fails with critical errors.
    pub fn load_validated() -> Result<(Self, ValidationResult)> {
        let config = Self::load()?;
        let validation = config.validate();

        if !validation.is_valid() {
            anyhow::bail!(
                "Configuration validation failed: {}",
                validation.error_summary()
            );
        }

        if !validation.warnings.is_empty() {
            for warning in &validation.warnings {
                tracing::warn!("Config warning: {}", warning);
            }
        }

        Ok((config, validation))
    }

    /// Validate the configuration
    pub fn validate(&self) -> ValidationResult {
        let mut result = ValidationResult::default();

        if self.cache.ttl_secs == 0 {
            result.add_warning("cache.ttl_secs", "TTL of 0 disables fresh serving entirely");
        }
        if self.cache.max_age_secs == 0 {
            result.add_error("cache.max_age_secs", "max_age must be greater than 0");
        } else if self.cache.max_age_secs <= self.cache.ttl_secs {
            result.add_error(
                "cache.max_age_secs",
                "max_age must be greater than ttl (stale window would be empty)",
            );
        }

        if self.sources.request_timeout_secs == 0 {
            result.add_error("sources.request_timeout_secs", "Timeout must be greater than 0");
        } else if self.sources.request_timeout_secs > 120 {
            result.add_warning(
                "sources.request_timeout_secs",
                "Request timeout is unusually long (>120s)",
            );
        }

        if let SourceMode::Pinned(ProviderId::Timeline) = self.sources.mode {
            if self.sources.timeline_api_key.is_none() {
                result.add_error(
                    "sources.timeline_api_key",
                    "Timeline provider is pinned but has no API key",
                );
            }
        }

        if self.alerts.hourly_cap == 0 {
            result.add_warning("alerts.hourly_cap", "Hourly cap of 0 suppresses all alerts");
        }
        if self.alerts.history_bound == 0 {
            result.add_error("alerts.history_bound", "History bound must be greater than 0");
        }
        if self.alerts.enabled_severities.is_empty() {
            result.add_warning(
                "alerts.enabled_severities",
                "No severities enabled - alert notifications are off",
            );
        }
        if self.alerts.global_cooldown_secs > self.alerts.per_alert_cooldown_secs {
            result.add_warning(
                "alerts.global_cooldown_secs",
                "Global cooldown exceeds per-alert cooldown",
            );
        }

        result
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent).context("Failed to create config directory")?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents).context("Failed to write config file")?;

        Ok(())
    }

    /// Path to the on-disk cache database.
    pub fn cache_db_path(&self) -> PathBuf {
        self.config_dir.join(&self.cache.db_file)
    }

    /// Get the path to the configuration file
    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("nimbus");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_default_config() {
        let config = NimbusConfig::default();
        let result = config.validate();
        assert!(result.is_valid(), "Default config should be valid: {:?}", result.errors);
    }

    #[test]
    fn test_max_age_must_exceed_ttl() {
        let mut config = NimbusConfig::default();
        config.cache.ttl_secs = 600;
        config.cache.max_age_secs = 600;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "cache.max_age_secs"));
    }

    #[test]
    fn test_pinned_timeline_requires_key() {
        let mut config = NimbusConfig::default();
        config.sources.mode = SourceMode::Pinned(ProviderId::Timeline);
        config.sources.timeline_api_key = None;
        let result = config.validate();
        assert!(!result.is_valid());
        assert!(result.errors.iter().any(|e| e.field == "sources.timeline_api_key"));

        config.sources.timeline_api_key = Some("k".into());
        assert!(config.validate().is_valid());
    }

    #[test]
    fn test_zero_timeout_is_error() {
        let mut config = NimbusConfig::default();
        config.sources.request_timeout_secs = 0;
        let result = config.validate();
        assert!(!result.is_valid());
    }

    #[test]
    fn test_empty_severities_is_warning() {
        let mut config = NimbusConfig::default();
        config.alerts.enabled_severities.clear();
        let result = config.validate();
        assert!(result.is_valid());
        assert!(result.warnings.iter().any(|w| w.field == "alerts.enabled_severities"));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let config = NimbusConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        let back: NimbusConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(back.cache.ttl_secs, config.cache.ttl_secs);
        assert_eq!(back.alerts.hourly_cap, config.alerts.hourly_cap);
        assert_eq!(back.sources.mode, config.sources.mode);
    }

    #[test]
    fn test_validation_result_error_summary() {
        let mut result = ValidationResult::default();
        result.add_error("field1", "error1");
        result.add_error("field2", "error2");
        let summary = result.error_summary();
        assert!(summary.contains("field1"));
        assert!(summary.contains("field2"));
    }
}
