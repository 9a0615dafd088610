//! Configuration: TOML file + `SPOOL_*` environment overrides.
//!
//! ```toml
//! database = "app"
//! max_workers = 8
//! on_execution_failure = "fatal"   # or "discard"
//!
//! [pool]
//! size = 2
//! name_prefix = "job worker"
//! ```

use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const ENV_DATABASE: &str = "SPOOL_DATABASE";
pub const ENV_POOL_SIZE: &str = "SPOOL_POOL_SIZE";
pub const ENV_WORKER_PREFIX: &str = "SPOOL_WORKER_PREFIX";
pub const ENV_MAX_WORKERS: &str = "SPOOL_MAX_WORKERS";
pub const ENV_ON_EXECUTION_FAILURE: &str = "SPOOL_ON_EXECUTION_FAILURE";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value {value:?} for {var}: {reason}")]
    InvalidEnv {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// What a worker does when a claimed job's procedure fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionFailurePolicy {
    /// Roll the whole cycle back (the job stays queued) and end the worker.
    #[default]
    Fatal,
    /// Undo the call, keep the claim, log the failure and keep draining.
    Discard,
}

impl FromStr for ExecutionFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fatal" => Ok(Self::Fatal),
            "discard" => Ok(Self::Discard),
            other => Err(format!("expected \"fatal\" or \"discard\", got {other:?}")),
        }
    }
}

/// Worker pool identity and size.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Workers started by one pool launch.
    pub size: u32,
    /// Worker names are `"{name_prefix} {index}"`.
    pub name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 1,
            name_prefix: "job worker".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    /// Database the workers bind to.
    pub database: String,
    pub pool: PoolConfig,
    /// Concurrent worker slots of the spawner.
    pub max_workers: usize,
    pub on_execution_failure: ExecutionFailurePolicy,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        Self {
            database: "postgres".to_string(),
            pool: PoolConfig::default(),
            max_workers: 8,
            on_execution_failure: ExecutionFailurePolicy::default(),
        }
    }
}

impl SpoolConfig {
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// File (if any), then process environment, then validation.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        let config = config.apply_env_from(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `SPOOL_*` variables found by `lookup`.
    pub fn apply_env_from<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database) = lookup(ENV_DATABASE) {
            self.database = database;
        }
        if let Some(prefix) = lookup(ENV_WORKER_PREFIX) {
            self.pool.name_prefix = prefix;
        }
        if let Some(value) = lookup(ENV_POOL_SIZE) {
            self.pool.size = parse_env(ENV_POOL_SIZE, value)?;
        }
        if let Some(value) = lookup(ENV_MAX_WORKERS) {
            self.max_workers = parse_env(ENV_MAX_WORKERS, value)?;
        }
        if let Some(value) = lookup(ENV_ON_EXECUTION_FAILURE) {
            self.on_execution_failure = parse_env(ENV_ON_EXECUTION_FAILURE, value)?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.trim().is_empty() {
            return Err(ConfigError::Invalid("database must not be empty".into()));
        }
        if self.pool.size == 0 {
            return Err(ConfigError::Invalid("pool.size must be at least 1".into()));
        }
        if self.max_workers == 0 {
            return Err(ConfigError::Invalid("max_workers must be at least 1".into()));
        }
        Ok(())
    }
}

fn parse_env<T>(var: &'static str, value: String) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match value.parse::<T>() {
        Ok(parsed) => Ok(parsed),
        Err(e) => Err(ConfigError::InvalidEnv {
            var,
            reason: e.to_string(),
            value,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = SpoolConfig::default();
        config.validate().unwrap();
        assert_eq!(config.pool.name_prefix, "job worker");
        assert_eq!(config.on_execution_failure, ExecutionFailurePolicy::Fatal);
    }

    #[test]
    fn parses_toml_with_partial_sections() {
        let config = SpoolConfig::from_toml_str(
            r#"
            database = "app"
            on_execution_failure = "discard"

            [pool]
            size = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.database, "app");
        assert_eq!(config.pool.size, 3);
        assert_eq!(config.pool.name_prefix, "job worker");
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.on_execution_failure, ExecutionFailurePolicy::Discard);
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = SpoolConfig::from_toml_str(r#"on_execution_failure = "retry""#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [
            (ENV_DATABASE, "reports"),
            (ENV_POOL_SIZE, "4"),
            (ENV_ON_EXECUTION_FAILURE, "Discard"),
        ]
        .into_iter()
        .collect();

        let config = SpoolConfig::default()
            .apply_env_from(|var| env.get(var).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database, "reports");
        assert_eq!(config.pool.size, 4);
        assert_eq!(config.on_execution_failure, ExecutionFailurePolicy::Discard);
    }

    #[test]
    fn bad_env_value_names_the_variable() {
        let err = SpoolConfig::default()
            .apply_env_from(|var| (var == ENV_MAX_WORKERS).then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { var, .. } if var == ENV_MAX_WORKERS));
    }

    #[test]
    fn zero_pool_size_is_invalid() {
        let mut config = SpoolConfig::default();
        config.pool.size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }
}
