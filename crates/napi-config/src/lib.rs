//! Configuration for embedding the NAPI core.
//!
//! TOML file + `NAPI_`-prefixed environment, merged over built-in
//! defaults with figment, translated into `napi_core::CoreConfig`. Also
//! installs the tracing subscriber the core logs through.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use napi_core::CoreConfig;

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("tracing setup failed: {0}")]
    Tracing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub log: LogConfig,

    #[serde(default)]
    pub buckets: BucketVersions,

    #[serde(default)]
    pub provision: ProvisionConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. `info` or `napi_core=debug,warn`.
    /// `RUST_LOG` takes precedence.
    #[serde(default = "default_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output.
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { level: default_level(), json: false }
    }
}

fn default_level() -> String {
    "info".into()
}

/// Schema versions requested at bucket initialization.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct BucketVersions {
    #[serde(default = "default_nic_version")]
    pub nic_version: u32,

    #[serde(default = "default_ip_version")]
    pub ip_version: u32,
}

impl Default for BucketVersions {
    fn default() -> Self {
        Self {
            nic_version: default_nic_version(),
            ip_version: default_ip_version(),
        }
    }
}

fn default_nic_version() -> u32 {
    CoreConfig::default().nic_bucket_version
}
fn default_ip_version() -> u32 {
    CoreConfig::default().ip_bucket_version
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ProvisionConfig {
    /// Tries per request when another writer takes the chosen IP first.
    #[serde(default = "default_attempts")]
    pub attempts: u32,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self { attempts: default_attempts() }
    }
}

fn default_attempts() -> u32 {
    CoreConfig::default().provision_attempts
}

impl Config {
    /// Validate and translate into the core's tunables.
    pub fn core(&self) -> Result<CoreConfig, ConfigError> {
        if self.provision.attempts == 0 {
            return Err(ConfigError::Validation {
                field: "provision.attempts".into(),
                reason: "must be at least 1".into(),
            });
        }
        for (field, version) in [
            ("buckets.nic_version", self.buckets.nic_version),
            ("buckets.ip_version", self.buckets.ip_version),
        ] {
            if version == 0 {
                return Err(ConfigError::Validation {
                    field: field.into(),
                    reason: "must be at least 1".into(),
                });
            }
        }

        Ok(CoreConfig {
            nic_bucket_version: self.buckets.nic_version,
            ip_bucket_version: self.buckets.ip_version,
            provision_attempts: self.provision.attempts,
        })
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("org", "napi", "napi").map_or_else(
        || PathBuf::from("napi.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Config loading ──────────────────────────────────────────────────

/// Load from `path` (missing files are skipped) and the environment.
///
/// Nested keys use a double underscore: `NAPI_PROVISION__ATTEMPTS=5`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    debug!(path = %path.display(), "loading config");
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("NAPI_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load from the platform config path and the environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write it to `path`.
pub fn save_config(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Tracing ─────────────────────────────────────────────────────────

/// Filter for `log`: `RUST_LOG` when set, else the configured level.
pub fn env_filter(log: &LogConfig) -> Result<EnvFilter, ConfigError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&log.level).map_err(|e| ConfigError::Validation {
        field: "log.level".into(),
        reason: e.to_string(),
    })
}

/// Install the global fmt subscriber. Fails if one is already set.
pub fn init_tracing(log: &LogConfig) -> Result<(), ConfigError> {
    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter(log)?)
        .with_target(false);

    let installed = if log.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| ConfigError::Tracing(e.to_string()))
}
