//! Configuration errors.

use std::path::PathBuf;

/// Reasons a configuration is rejected at load or reload time.
///
/// A rejected reload never replaces the active configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid target url '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("invalid header '{name}': {reason}")]
    InvalidHeader { name: String, reason: String },

    #[error("endpoints[{endpoint}] has invalid path '{path}': {reason}")]
    InvalidPath {
        endpoint: usize,
        path: String,
        reason: &'static str,
    },

    #[error("endpoints[{endpoint}] ({path}) has unknown method '{method}'")]
    UnknownMethod {
        endpoint: usize,
        path: String,
        method: String,
    },

    #[error("endpoints[{endpoint}] ({path}) declares no methods")]
    NoMethods { endpoint: usize, path: String },

    #[error(
        "endpoints[{endpoint}].failure_rules[{rule}] combines triggers {}; use exactly one",
        .triggers.join(" and ")
    )]
    ConflictingTriggers {
        endpoint: usize,
        rule: usize,
        triggers: Vec<&'static str>,
    },

    #[error("endpoints[{endpoint}].failure_rules[{rule}]: {reason}")]
    InvalidRule {
        endpoint: usize,
        rule: usize,
        reason: String,
    },
}
