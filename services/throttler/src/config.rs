//! Configuration for the throttler.
//!
//! Loaded once per process from a file (format inferred from the extension)
//! with environment overrides, e.g. `THROTTLER__THROTTLE__MAX_COMPILE_JOBS=4`.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use throttle_tgs::{TgsSettings, DEFAULT_API_VERSION};

use crate::db::DbConfig;
use crate::scheduler::ThrottleSettings;

/// Prefix for environment overrides.
const ENV_PREFIX: &str = "THROTTLER";

/// Job description TGS gives deployment (compile) jobs.
pub const DEFAULT_COMPILE_JOB_DESCRIPTION: &str = "Compile active repository code";

/// Configuration errors. All of them are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub throttle: ThrottleConfig,
    pub database: DbConfig,
    pub tgs: TgsConfig,
}

impl Config {
    /// Load from `path`, then apply environment overrides.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let config: Self = ::config::Config::builder()
            .add_source(::config::File::from(path))
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.throttle.max_compile_jobs == 0 {
            return Err(ConfigError::Invalid(
                "throttle.max_compile_jobs must be at least 1".to_string(),
            ));
        }
        if self.throttle.compile_job_description.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "throttle.compile_job_description must not be empty".to_string(),
            ));
        }
        if self.database.url.is_empty() {
            return Err(ConfigError::Invalid("database.url is required".to_string()));
        }
        if self.tgs.url.is_empty() {
            return Err(ConfigError::Invalid("tgs.url is required".to_string()));
        }
        Ok(())
    }
}

/// Scheduling limits and working copy layout.
#[derive(Debug, Clone, Deserialize)]
pub struct ThrottleConfig {
    /// How many compile jobs may run at once.
    pub max_compile_jobs: usize,

    #[serde(default = "default_compile_job_description")]
    pub compile_job_description: String,

    /// Timeout for each git invocation, in seconds.
    #[serde(default = "default_git_timeout_secs")]
    pub git_timeout_secs: u64,

    /// Directory of the working copy, relative to the instance path.
    #[serde(default = "default_repository_subdir")]
    pub repository_subdir: String,
}

fn default_compile_job_description() -> String {
    DEFAULT_COMPILE_JOB_DESCRIPTION.to_string()
}

const fn default_git_timeout_secs() -> u64 {
    120
}

fn default_repository_subdir() -> String {
    "Repository".to_string()
}

impl ThrottleConfig {
    pub fn git_timeout(&self) -> Duration {
        Duration::from_secs(self.git_timeout_secs)
    }

    pub fn settings(&self, dry_run: bool) -> ThrottleSettings {
        ThrottleSettings {
            max_compile_jobs: self.max_compile_jobs,
            compile_job_description: self.compile_job_description.clone(),
            dry_run,
        }
    }
}

/// TGS API connection.
#[derive(Clone, Deserialize)]
pub struct TgsConfig {
    pub url: String,
    pub username: String,
    pub password: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_api_version() -> String {
    DEFAULT_API_VERSION.to_string()
}

const fn default_request_timeout_secs() -> u64 {
    30
}

impl TgsConfig {
    pub fn settings(&self) -> TgsSettings {
        TgsSettings {
            base_url: self.url.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            api_version: self.api_version.clone(),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

impl std::fmt::Debug for TgsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TgsConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("api_version", &self.api_version)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}
