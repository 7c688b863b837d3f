use anyhow::{Context, Result};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Yaml};
use thiserror::Error;

use crate::domain::models::config::{Config, SandboxMode};

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error(
        "Invalid backoff configuration: initial_backoff_ms ({0}) must be less than max_backoff_ms ({1})"
    )]
    InvalidBackoff(u64, u64),

    #[error("Invalid sandbox timeout: {0}. Must be at least 1 second")]
    InvalidSandboxTimeout(u64),

    #[error("Invalid reasoning timeout: {0}. Must be at least 1 second")]
    InvalidReasoningTimeout(u64),

    #[error("Reasoning base URL cannot be empty")]
    EmptyReasoningUrl,

    #[error("Results path cannot be empty")]
    EmptyResultsPath,

    #[error("Invalid failure history window: {0}. Must be at least 2")]
    InvalidHistoryWindow(usize),

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
    /// 2. .ci-healer/config.yaml
    /// 3. .ci-healer/local.yaml (optional)
    /// 4. Environment variables (HEALER_* prefix, `__` for nesting)
    pub fn load() -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(".ci-healer/config.yaml"))
            .merge(Yaml::file(".ci-healer/local.yaml"))
            .merge(Env::prefixed("HEALER_").split("__"))
            .extract()
            .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file. Environment overrides
    /// still apply on top.
    pub fn load_from_file(path: impl AsRef<std::path::Path>) -> Result<Config> {
        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed("HEALER_").split("__"))
            .extract()
            .context(format!(
                "Failed to load config from {}",
                path.as_ref().display()
            ))?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        if config.retry.initial_backoff_ms >= config.retry.max_backoff_ms {
            return Err(ConfigError::InvalidBackoff(
                config.retry.initial_backoff_ms,
                config.retry.max_backoff_ms,
            ));
        }

        if config.sandbox.timeout_secs == 0 {
            return Err(ConfigError::InvalidSandboxTimeout(config.sandbox.timeout_secs));
        }

        if config.reasoning.timeout_secs == 0 {
            return Err(ConfigError::InvalidReasoningTimeout(
                config.reasoning.timeout_secs,
            ));
        }

        if config.reasoning.base_url.trim().is_empty() {
            return Err(ConfigError::EmptyReasoningUrl);
        }

        if config.results.path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyResultsPath);
        }

        if config.healing.failure_history_window < 2 {
            return Err(ConfigError::InvalidHistoryWindow(
                config.healing.failure_history_window,
            ));
        }

        if config.sandbox.mode == SandboxMode::Docker && config.sandbox.docker_binary.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "sandbox.docker_binary cannot be empty in docker mode".to_string(),
            ));
        }

        for (stack, template) in [("python", &config.sandbox.python), ("node", &config.sandbox.node)] {
            if template.test_command.trim().is_empty() {
                return Err(ConfigError::ValidationFailed(format!(
                    "sandbox.{stack}.test_command cannot be empty"
                )));
            }
        }

        if config.publish.commit_prefix.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "publish.commit_prefix cannot be empty".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::config::LogFormat;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.healing.default_max_iterations, 5);
        assert_eq!(config.scoring.speed_bonus_points, 10);
        assert_eq!(config.publish.commit_prefix, "[AI-AGENT]");
        assert_eq!(config.logging.level, "info");
        ConfigLoader::validate(&config).expect("Default config should be valid");
    }

    #[test]
    fn test_yaml_parsing() {
        let yaml = r"
logging:
  level: debug
  format: json
sandbox:
  mode: local
  timeout_secs: 60
healing:
  default_max_iterations: 3
scoring:
  penalty_per_commit: 5
publish:
  enabled: false
";

        let config: Config = serde_yaml::from_str(yaml).expect("YAML should parse");

        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.sandbox.mode, SandboxMode::Local);
        assert_eq!(config.sandbox.timeout_secs, 60);
        assert_eq!(config.sandbox.python.no_tests_exit_code, Some(5));
        assert_eq!(config.healing.default_max_iterations, 3);
        assert_eq!(config.scoring.penalty_per_commit, 5);
        assert_eq!(config.scoring.penalty_commit_threshold, 20);
        assert!(!config.publish.enabled);

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
    fn test_validate_invalid_backoff() {
        let mut config = Config::default();
        config.retry.initial_backoff_ms = 30000;
        config.retry.max_backoff_ms = 10000;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidBackoff(30000, 10000)
        ));
    }

    #[test]
    fn test_validate_zero_sandbox_timeout() {
        let mut config = Config::default();
        config.sandbox.timeout_secs = 0;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidSandboxTimeout(0)
        ));
    }

    #[test]
    fn test_validate_history_window() {
        let mut config = Config::default();
        config.healing.failure_history_window = 1;

        assert!(matches!(
            ConfigLoader::validate(&config).unwrap_err(),
            ConfigError::InvalidHistoryWindow(1)
        ));
    }

    #[test]
    fn test_validate_empty_test_command() {
        let mut config = Config::default();
        config.sandbox.node.test_command = "  ".to_string();

        match ConfigLoader::validate(&config).unwrap_err() {
            ConfigError::ValidationFailed(msg) => assert!(msg.contains("sandbox.node")),
            other => panic!("Expected ValidationFailed error, got {other:?}"),
        }
    }

    #[test]
    fn test_env_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "logging:\n  level: warn\nsandbox:\n  timeout_secs: 90\n").unwrap();

        temp_env::with_vars(
            [
                ("HEALER_LOGGING__LEVEL", Some("debug")),
                ("HEALER_HEALING__DEFAULT_MAX_ITERATIONS", Some("9")),
            ],
            || {
                let config = ConfigLoader::load_from_file(&path).unwrap();
                assert_eq!(config.logging.level, "debug", "env should win over file");
                assert_eq!(config.sandbox.timeout_secs, 90, "file should win over defaults");
                assert_eq!(config.healing.default_max_iterations, 9);
            },
        );
    }

    #[test]
    fn test_hierarchical_merging() {
        use std::io::Write;
        use tempfile::NamedTempFile;

        let mut base_file = NamedTempFile::new().unwrap();
        writeln!(
            base_file,
            "healing:\n  default_max_iterations: 4\nlogging:\n  level: info\n  format: json"
        )
        .unwrap();
        base_file.flush().unwrap();

        let mut override_file = NamedTempFile::new().unwrap();
        writeln!(override_file, "healing:\n  default_max_iterations: 7\nlogging:\n  level: debug").unwrap();
        override_file.flush().unwrap();

        let config: Config = Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Yaml::file(base_file.path()))
            .merge(Yaml::file(override_file.path()))
            .extract()
            .unwrap();

        assert_eq!(config.healing.default_max_iterations, 7, "Override should win");
        assert_eq!(
            config.logging.level, "debug",
            "Override should win for nested fields"
        );
        assert_eq!(
            config.logging.format,
            LogFormat::Json,
            "Base value should persist when not overridden"
        );
    }
}
