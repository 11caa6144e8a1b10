//! Injected latency.

use crate::metrics;
use std::time::Duration;
use tracing::debug;

/// Flags a delay that was dropped before it elapsed, which happens when the
/// caller disconnects or the request timeout fires mid-sleep.
struct InterruptGuard {
    delay: Duration,
    completed: bool,
}

impl Drop for InterruptGuard {
    fn drop(&mut self) {
        if !self.completed {
            debug!(
                "Injected delay of {}ms interrupted before completion",
                self.delay.as_millis()
            );
            metrics::record_delay_interrupted();
        }
    }
}

/// Suspend the current request for `delay` without blocking the runtime.
pub async fn apply_delay(delay: Duration) {
    if delay.is_zero() {
        return;
    }
    let mut guard = InterruptGuard {
        delay,
        completed: false,
    };
    tokio::time::sleep(delay).await;
    guard.completed = true;
    metrics::record_delay(delay.as_millis() as u64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_apply_delay_waits() {
        let start = tokio::time::Instant::now();
        apply_delay(Duration::from_millis(250)).await;
        assert!(start.elapsed() >= Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_zero_delay_returns_immediately() {
        let start = Instant::now();
        apply_delay(Duration::ZERO).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_dropped_delay_counts_as_interrupted() {
        let before = metrics::DELAYS_INTERRUPTED_TOTAL.get();
        let result =
            tokio::time::timeout(Duration::from_millis(10), apply_delay(Duration::from_secs(5)))
                .await;
        assert!(result.is_err());
        assert!(metrics::DELAYS_INTERRUPTED_TOTAL.get() >= before + 1.0);
    }
}
