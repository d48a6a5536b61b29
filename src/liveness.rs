//! Liveness watchdog (spec.md §4.2): resets on every inbound chunk, and
//! fires once if no chunk arrives before `server_timeout_ms` elapses.
//!
//! Adapted from `libtiny_client`'s `pinger` task (same reset-or-fire shape).
//! Collapsed from a two-state send-ping/expect-pong machine into a
//! single-state watchdog: spec.md §4.2 says "every received chunk
//! resets a reconnect timer; if the timer fires before another chunk
//! arrives, treat as dead and reconnect". Liveness is judged by any
//! inbound traffic, including the server's own PING keepalives; this
//! crate never sends pings of its own accord.

use std::pin::Pin;
use std::time::Duration;

use tokio::time::{sleep, Instant, Sleep};

/// Used in place of a real deadline when no `server_timeout_ms` is
/// configured, so the watchdog never needs a second, optional code path
/// in the Connection Manager's select loop.
const DISABLED_TIMEOUT: Duration = Duration::from_secs(60 * 60 * 24 * 365 * 100);

pub(crate) struct LivenessTimer {
    timeout: Duration,
    deadline: Pin<Box<Sleep>>,
}

impl LivenessTimer {
    pub(crate) fn new(configured: Option<Duration>) -> Self {
        let timeout = configured.unwrap_or(DISABLED_TIMEOUT);
        LivenessTimer {
            timeout,
            deadline: Box::pin(sleep(timeout)),
        }
    }

    /// Call on every inbound chunk.
    pub(crate) fn reset(&mut self) {
        self.deadline.as_mut().reset(Instant::now() + self.timeout);
    }

    /// Resolves once the deadline passes with no intervening `reset`.
    pub(crate) async fn fired(&mut self) {
        self.deadline.as_mut().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_after_timeout_without_reset() {
        let mut timer = LivenessTimer::new(Some(Duration::from_millis(100)));
        tokio::time::advance(Duration::from_millis(150)).await;
        tokio::time::timeout(Duration::from_millis(10), timer.fired())
            .await
            .expect("timer should have already fired");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_postpones_firing() {
        let mut timer = LivenessTimer::new(Some(Duration::from_millis(100)));
        tokio::time::advance(Duration::from_millis(80)).await;
        timer.reset();
        tokio::time::advance(Duration::from_millis(80)).await;
        // 160ms elapsed since start, but only 80ms since reset: should not have fired yet.
        assert!(tokio::time::timeout(Duration::from_millis(5), timer.fired())
            .await
            .is_err());
    }
}
