//! Polling watcher for the configuration file.
//!
//! The file's modification time and length are sampled on an interval; any
//! change invokes the callback. Editors that replace the file (write to a temp
//! file, then rename) are handled the same way since only metadata is compared.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FileStamp {
    modified: Option<SystemTime>,
    len: u64,
}

async fn stamp(path: &Path) -> Option<FileStamp> {
    let meta = tokio::fs::metadata(path).await.ok()?;
    Some(FileStamp {
        modified: meta.modified().ok(),
        len: meta.len(),
    })
}

pub struct ConfigWatcher {
    path: PathBuf,
    interval: Duration,
}

impl ConfigWatcher {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        Self {
            path: path.into(),
            interval,
        }
    }

    /// Watch in a background task, calling `on_change` after each change.
    pub fn spawn<F>(self, on_change: F) -> JoinHandle<()>
    where
        F: FnMut(&Path) + Send + 'static,
    {
        tokio::spawn(self.run(on_change))
    }

    pub async fn run<F>(self, mut on_change: F)
    where
        F: FnMut(&Path) + Send + 'static,
    {
        let mut last = stamp(&self.path).await;
        if last.is_none() {
            warn!(
                "Config file {} is not readable yet; waiting for it to appear",
                self.path.display()
            );
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let current = stamp(&self.path).await;
            if current == last {
                continue;
            }
            last = current;
            match current {
                Some(_) => {
                    debug!("Detected change in {}", self.path.display());
                    on_change(&self.path);
                }
                // mid-rename or deleted; keep serving and wait for it to come back
                None => debug!("Config file {} disappeared", self.path.display()),
            }
        }
    }
}
