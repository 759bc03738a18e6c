use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use std::path::Path;
use thiserror::Error;

use crate::domain::models::config::Config;

/// Directory holding project-local configuration
pub const CONFIG_DIR: &str = ".swarmgate";

/// Prefix for environment overrides; nested keys are split on `__`
pub const ENV_PREFIX: &str = "SWARMGATE_";

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid log format: {0}. Must be one of: json, pretty")]
    InvalidLogFormat(String),

    #[error("Invalid log rotation: {0}. Must be one of: daily, hourly, never")]
    InvalidRotation(String),

    #[error("Invalid queue limits: {0}")]
    InvalidLimits(String),

    #[error("Invalid history capacity: {0}. Must be at least 1")]
    InvalidHistoryCapacity(usize),

    #[error("Invalid broadcast buffer: {0}. Must be at least 1")]
    InvalidBroadcastBuffer(usize),

    #[error("Invalid consensus threshold: {0}. Must be in (0, 1]")]
    InvalidConsensusThreshold(f64),

    #[error("Invalid credit spike factor: {0}. Must be greater than 1")]
    InvalidSpikeFactor(f64),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration with hierarchical merging
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .swarmgate/config.yaml (project config)
    /// 3. .swarmgate/local.yaml (project local overrides, optional)
    /// 4. Environment variables (SWARMGATE_* prefix, highest priority)
    pub fn load() -> Result<Config> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(Path::new(CONFIG_DIR).join("config.yaml")))
            .merge(Yaml::file(Path::new(CONFIG_DIR).join("local.yaml")));
        Self::finish(figment).context("Failed to extract configuration from figment")
    }

    /// Load configuration from a specific file; environment overrides still apply
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let figment = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path));
        Self::finish(figment).with_context(|| format!("Failed to load config from {}", path.display()))
    }

    /// `--config` wins over the project files when given
    pub fn load_with_override(path: Option<&Path>) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Self::load(),
        }
    }

    fn finish(figment: Figment) -> Result<Config> {
        let config: Config = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()?;
        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let valid_log_formats = ["json", "pretty"];
        if !valid_log_formats.contains(&config.logging.format.as_str()) {
            return Err(ConfigError::InvalidLogFormat(config.logging.format.clone()));
        }

        let valid_rotations = ["daily", "hourly", "never"];
        if !valid_rotations.contains(&config.logging.rotation.as_str()) {
            return Err(ConfigError::InvalidRotation(config.logging.rotation.clone()));
        }

        for (queue, limits) in config.queues.iter() {
            limits
                .validate(queue)
                .map_err(|e| ConfigError::InvalidLimits(e.to_string()))?;
        }

        if config.history.capacity == 0 {
            return Err(ConfigError::InvalidHistoryCapacity(config.history.capacity));
        }
        if config.history.broadcast_buffer == 0 {
            return Err(ConfigError::InvalidBroadcastBuffer(
                config.history.broadcast_buffer,
            ));
        }

        let monitor = &config.monitor;
        if monitor.analysis_interval_ms == 0 {
            return Err(ConfigError::ValidationFailed(
                "monitor.analysis_interval_ms must be positive".to_string(),
            ));
        }
        if monitor.bottleneck_p95_threshold_ms <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "monitor.bottleneck_p95_threshold_ms must be positive".to_string(),
            ));
        }
        if monitor.error_cluster_window_ms <= 0 {
            return Err(ConfigError::ValidationFailed(
                "monitor.error_cluster_window_ms must be positive".to_string(),
            ));
        }
        if monitor.min_cluster_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "monitor.min_cluster_size must be at least 1".to_string(),
            ));
        }
        if monitor.credit_spike_factor <= 1.0 {
            return Err(ConfigError::InvalidSpikeFactor(monitor.credit_spike_factor));
        }
        if !(monitor.consensus_threshold > 0.0 && monitor.consensus_threshold <= 1.0) {
            return Err(ConfigError::InvalidConsensusThreshold(
                monitor.consensus_threshold,
            ));
        }

        if config.dispatch.tier_order.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "dispatch.tier_order must name at least one tier".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{LongRunningPolicy, TierKind};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.queues.routine.max_active, 10);
        assert_eq!(config.queues.routine.long_running_threshold_premium_ms, 900_000);
        assert_eq!(config.history.capacity, 10_000);
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: pretty
queues:
  routine:
    max_active: 4
    high_load_check_interval_ms: 5000
    high_load_threshold_percentage: 0.75
    long_running_threshold_free_ms: 1000
    long_running_threshold_premium_ms: 2000
    task_timeout_ms: 3000
    shutdown_grace_period_ms: 500
    on_long_running_first_threshold: stop
    long_running_pause_retries: 0
    long_running_stop_retries: 2
dispatch:
  tier_order: [step, routine, swarm]
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.queues.routine.max_active, 4);
        assert_eq!(
            config.queues.routine.on_long_running_first_threshold,
            LongRunningPolicy::Stop
        );
        // Unspecified queues keep their class defaults.
        assert_eq!(config.queues.step.max_active, 20);
        assert_eq!(config.dispatch.tier_order[0], TierKind::Step);
        ConfigLoader::validate(&config).expect("Parsed config should be valid");
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.logging.level = "invalid".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::InvalidLogLevel(level) => assert_eq!(level, "invalid"),
            other => panic!("Expected InvalidLogLevel error, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_invalid_log_format() {
        let mut config = Config::default();
        config.logging.format = "xml".to_string();

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLogFormat(format) if format == "xml"
        ));
    }

    #[test]
    fn test_validate_rejects_bad_limits() {
        let mut config = Config::default();
        config.queues.step.max_active = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLimits(msg) if msg.contains("step")
        ));

        let mut config = Config::default();
        config.queues.routine.task_timeout_ms = config.queues.routine.long_running_threshold_premium_ms;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidLimits(_)
        ));
    }

    #[test]
    fn test_validate_history_and_monitor() {
        let mut config = Config::default();
        config.history.capacity = 0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidHistoryCapacity(0)
        ));

        let mut config = Config::default();
        config.monitor.consensus_threshold = 1.5;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidConsensusThreshold(_)
        ));

        let mut config = Config::default();
        config.monitor.credit_spike_factor = 1.0;
        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidSpikeFactor(_)
        ));
    }

    #[test]
    fn test_env_override() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "logging:\n  level: warn\n  format: json").unwrap();
        file.flush().unwrap();

        temp_env::with_vars(
            [
                ("SWARMGATE_LOGGING__LEVEL", Some("debug")),
                ("SWARMGATE_HISTORY__CAPACITY", Some("42")),
            ],
            || {
                let config = ConfigLoader::load_from_file(file.path()).unwrap();
                assert_eq!(config.logging.level, "debug", "Env should win over file");
                assert_eq!(config.history.capacity, 42);
            },
        );
    }

    #[test]
    fn test_invalid_env_value_fails_validation() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "history:\n  capacity: 10").unwrap();
        file.flush().unwrap();

        temp_env::with_var("SWARMGATE_HISTORY__CAPACITY", Some("0"), || {
            assert!(ConfigLoader::load_from_file(file.path()).is_err());
        });
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(ConfigLoader::load_from_file(&missing).is_err());
    }

    #[test]
    fn test_hierarchical_merging() {
        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "history:\n  capacity: 500\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "history:\n  capacity: 900\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.history.capacity, 900, "Override should win");
        assert_eq!(config.logging.level, "debug");
        assert_eq!(
            config.logging.format, "json",
            "Base value should persist when not overridden"
        );
    }
}
