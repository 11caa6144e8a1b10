//! Snare: an HTTP debug proxy that forwards to one backend and injects
//! configured failures and delays on matching endpoints.

pub mod config;
pub mod engine;
pub mod logging;
pub mod metrics;
pub mod proxy;
pub mod watcher;

pub use config::{Config, ConfigError};
pub use engine::{ConfigSwap, Snapshot};
pub use proxy::{ProxyHandler, ProxyServer, UpstreamClient};
