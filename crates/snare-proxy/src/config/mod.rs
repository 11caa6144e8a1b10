//! Configuration types for the Snare proxy.

mod env;
mod error;
mod listen;
mod protocol;
mod target;
mod upstream;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub use env::expand_env;
pub use error::ConfigError;
pub use listen::{LoggingConfig, MetricsConfig, ServerConfig};
pub use protocol::Protocol;
pub use target::{
    ConditionConfig, EndpointConfig, FailureResponseConfig, FailureRuleConfig, TargetConfig,
    UnmatchedPolicy, ANY_METHOD, KNOWN_METHODS,
};
pub use upstream::ConnectionPoolConfig;

/// Config file read when none is given on the command line.
pub const DEFAULT_CONFIG_PATH: &str = "config.yaml";
/// Fallback used when [`DEFAULT_CONFIG_PATH`] does not exist.
pub const EXAMPLE_CONFIG_PATH: &str = "config.example.yaml";

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
    pub target: TargetConfig,
}

impl Config {
    /// Read, expand, parse and validate a config file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml_str(&contents)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let mut config: Config = serde_yaml::from_str(contents)?;
        config.expand_env();
        config.validate()?;
        Ok(config)
    }

    /// Substitute `${VAR}` references in target header values.
    fn expand_env(&mut self) {
        for value in self.target.headers.values_mut() {
            *value = expand_env(value);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.target.validate()
    }
}

/// Pick the config file to load.
///
/// An explicitly requested path is used as is. Otherwise `config.yaml` is
/// preferred, with `config.example.yaml` as a fallback when it is missing.
pub fn resolve_config_path(requested: Option<&Path>) -> PathBuf {
    if let Some(path) = requested {
        return path.to_path_buf();
    }
    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
    if !default.exists() && Path::new(EXAMPLE_CONFIG_PATH).exists() {
        return PathBuf::from(EXAMPLE_CONFIG_PATH);
    }
    default
}
