//! Tracing subscriber setup with a reloadable level filter.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, reload, EnvFilter, Registry};

/// Handle for changing the log level after startup.
#[derive(Clone)]
pub struct LogHandle {
    handle: reload::Handle<EnvFilter, Registry>,
    /// `RUST_LOG` was set at startup and takes precedence over the config file
    pinned_by_env: bool,
}

/// Install the global subscriber.
///
/// `RUST_LOG` wins when set; otherwise `level` (a level name such as `info`)
/// is used.
pub fn init(level: &str) -> Result<LogHandle, anyhow::Error> {
    let (filter, pinned_by_env) = match EnvFilter::try_from_default_env() {
        Ok(filter) => (filter, true),
        Err(_) => (EnvFilter::try_new(level)?, false),
    };
    let (filter_layer, handle) = reload::Layer::new(filter);

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_target(false))
        .try_init()?;

    Ok(LogHandle {
        handle,
        pinned_by_env,
    })
}

impl LogHandle {
    /// Swap the active level. Ignored when the level came from `RUST_LOG`.
    pub fn set_level(&self, level: &str) -> Result<(), anyhow::Error> {
        if self.pinned_by_env {
            return Ok(());
        }
        let filter = EnvFilter::try_new(level)?;
        self.handle.reload(filter)?;
        Ok(())
    }
}
