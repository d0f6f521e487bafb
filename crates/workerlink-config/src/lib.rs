//! Configuration management for workerlink.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `WORKERLINK_*` environment variables. Nested keys use a double underscore,
//! e.g. `WORKERLINK_CONTROLLER__TICK_INTERVAL_MS=16`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Default drain period, roughly one animation frame.
pub const DEFAULT_TICK_INTERVAL_MS: u64 = 33;

/// Default log level used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "WORKERLINK";

/// Errors that can occur while loading or writing configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration source could not be read or deserialized.
    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    /// The merged configuration is not usable.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// I/O error while writing a configuration file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to render the configuration as TOML.
    #[error("Serialization error: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Settings for one side of the link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Period of the outbound drain tick (milliseconds).
    #[serde(default = "default_tick_interval")]
    pub tick_interval_ms: u64,

    /// Forward every locally dispatched message, not only marked ones.
    #[serde(default)]
    pub forward_all: bool,
}

fn default_tick_interval() -> u64 {
    DEFAULT_TICK_INTERVAL_MS
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            tick_interval_ms: DEFAULT_TICK_INTERVAL_MS,
            forward_all: false,
        }
    }
}

impl LinkSettings {
    /// The drain period as a `Duration`.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn with_tick_interval_ms(mut self, tick_interval_ms: u64) -> Self {
        self.tick_interval_ms = tick_interval_ms;
        self
    }

    pub fn with_forward_all(mut self, forward_all: bool) -> Self {
        self.forward_all = forward_all;
        self
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `tracing` filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Controller side of the link.
    #[serde(default)]
    pub controller: LinkSettings,

    /// Worker side of the link.
    #[serde(default)]
    pub worker: LinkSettings,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Config {
    /// Load configuration.
    ///
    /// With an explicit `path` the file must exist. Without one, the default
    /// location (see [`Config::default_path`]) is used when present.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = match path {
            Some(raw) => Some((expand_path(raw), true)),
            None => Self::default_path().map(|p| (p, false)),
        };

        let mut builder = config::Config::builder();
        if let Some((file, required)) = file {
            debug!(path = %file.display(), required, "Adding configuration file");
            builder = builder.add_source(
                config::File::from(file.as_path())
                    .format(config::FileFormat::Toml)
                    .required(required),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

        let config: Config = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// `<config dir>/workerlink/config.toml`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("workerlink").join("config.toml"))
    }

    /// Reject settings the runtime cannot honor.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (side, settings) in [("controller", &self.controller), ("worker", &self.worker)] {
            if settings.tick_interval_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{}.tick_interval_ms must be greater than zero",
                    side
                )));
            }
        }
        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::Invalid("logging.level must not be empty".to_string()));
        }
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Write the default configuration to `path`, creating parent directories.
    ///
    /// Refuses to overwrite an existing file unless `force` is set.
    pub fn write_default(path: &Path, force: bool) -> Result<(), ConfigError> {
        if path.exists() && !force {
            return Err(ConfigError::Invalid(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, Config::default().to_toml()?)?;
        Ok(())
    }
}

/// Expand `~` and environment variables in a user-supplied path.
///
/// Falls back to the raw string when a referenced variable is undefined.
pub fn expand_path(raw: &str) -> PathBuf {
    match shellexpand::full(raw) {
        Ok(expanded) => PathBuf::from(expanded.into_owned()),
        Err(_) => PathBuf::from(raw),
    }
}
