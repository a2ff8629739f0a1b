use std::path::Path;

use anyhow::{Context, Result};
use figment::providers::{Env, Format, Serialized, Yaml};
use figment::Figment;
use thiserror::Error;

use crate::domain::models::config::Config;
use crate::domain::models::SpecVersion;

/// Configuration error types
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid spec_version: {0}. Expected v1, v2, ...")]
    InvalidSpecVersion(String),

    #[error("Invalid log level: {0}. Must be one of: trace, debug, info, warn, error")]
    InvalidLogLevel(String),

    #[error("Invalid max_iterations: {0}. Must be at least 1")]
    InvalidMaxIterations(u32),

    #[error("Invalid trials: {0}. Must be at least 1")]
    InvalidTrials(u32),

    #[error("Invalid activation_attempts: {0}. Must be at least 1")]
    InvalidActivationAttempts(u32),

    #[error("Invalid concurrency: {0}. Must be at least 1")]
    InvalidConcurrency(usize),

    #[error("Timeout {0} cannot be 0")]
    ZeroTimeout(&'static str),

    #[error(
        "Invalid convergence timeouts: run_timeout_secs ({1}) must not be shorter than iteration_timeout_secs ({0})"
    )]
    InvalidRunTimeout(u64, u64),

    #[error("{0} program cannot be empty")]
    EmptyProgram(&'static str),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

const CONFIG_DIR: &str = ".tdad";

/// Configuration loader with hierarchical merging
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration relative to the current directory.
    ///
    /// Precedence (lowest to highest):
    /// 1. Programmatic defaults (Serialized)
    /// 2. .tdad/config.yaml (project config)
    /// 3. .tdad/local.yaml (local overrides, optional)
    /// 4. Environment variables (TDAD_* prefix, `__` separates nesting)
    pub fn load() -> Result<Config> {
        Self::load_from_dir(".")
    }

    /// Same layering as [`ConfigLoader::load`], rooted at `dir`.
    pub fn load_from_dir(dir: impl AsRef<Path>) -> Result<Config> {
        let base = dir.as_ref().join(CONFIG_DIR);
        let config: Config = Self::layered(
            Figment::new()
                .merge(Yaml::file(base.join("config.yaml")))
                .merge(Yaml::file(base.join("local.yaml"))),
        )
        .extract()
        .context("Failed to extract configuration from figment")?;

        Self::validate(&config)?;
        Ok(config)
    }

    /// Load configuration from a specific file, still honoring env overrides.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        if !path.exists() {
            anyhow::bail!("Config file not found: {}", path.display());
        }
        let config: Config = Self::layered(Figment::new().merge(Yaml::file(path)))
            .extract()
            .with_context(|| format!("Failed to load config from {}", path.display()))?;

        Self::validate(&config)?;
        Ok(config)
    }

    fn layered(files: Figment) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(files)
            .merge(Env::prefixed("TDAD_").split("__"))
    }

    /// Validate configuration after loading
    pub fn validate(config: &Config) -> Result<(), ConfigError> {
        if config.spec_version.parse::<SpecVersion>().is_err() {
            return Err(ConfigError::InvalidSpecVersion(config.spec_version.clone()));
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&config.logging.level.to_lowercase().as_str()) {
            return Err(ConfigError::InvalidLogLevel(config.logging.level.clone()));
        }

        let convergence = &config.convergence;
        if convergence.max_iterations == 0 {
            return Err(ConfigError::InvalidMaxIterations(0));
        }
        if convergence.iteration_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("convergence.iteration_timeout_secs"));
        }
        if convergence.run_timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("convergence.run_timeout_secs"));
        }
        if convergence.run_timeout_secs < convergence.iteration_timeout_secs {
            return Err(ConfigError::InvalidRunTimeout(
                convergence.iteration_timeout_secs,
                convergence.run_timeout_secs,
            ));
        }

        let mutation = &config.mutation;
        if mutation.trials == 0 {
            return Err(ConfigError::InvalidTrials(0));
        }
        if mutation.activation_attempts == 0 {
            return Err(ConfigError::InvalidActivationAttempts(0));
        }
        if mutation.concurrency == 0 {
            return Err(ConfigError::InvalidConcurrency(0));
        }

        if config.oracle.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram("oracle"));
        }
        if config.oracle.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("oracle.timeout_secs"));
        }
        if config.oracle.artifact_env.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "oracle.artifact_env cannot be empty".to_string(),
            ));
        }

        if config.agent.program.trim().is_empty() {
            return Err(ConfigError::EmptyProgram("agent"));
        }
        if config.agent.timeout_secs == 0 {
            return Err(ConfigError::ZeroTimeout("agent.timeout_secs"));
        }
        if config.agent.artifact_file.contains(['/', '\\']) || config.agent.artifact_file.is_empty() {
            return Err(ConfigError::ValidationFailed(format!(
                "agent.artifact_file must be a bare file name, got '{}'",
                config.agent.artifact_file
            )));
        }

        if config.store.lock_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("store.lock_timeout_ms"));
        }

        Ok(())
    }
}
