//! Retry backoff owned by a single transport.

use crate::config::BackoffConfig;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Consecutive-failure counter that turns into bounded exponential delays.
///
/// A transport calls [`Backoff::reset`] after every fully successful
/// exchange so that an unrelated later failure starts again from the
/// initial delay.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    attempts: u32,
}

impl Backoff {
    /// Creates a backoff with no recorded failures.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            attempts: 0,
        }
    }

    /// Number of consecutive failures recorded since the last reset.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        self.attempts = self.attempts.saturating_add(1);
        self.config.delay_for_attempt(self.attempts)
    }

    /// Forgets all recorded failures.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Records a failure and sleeps for the resulting delay.
    ///
    /// Returns `false` if the token was cancelled before the delay elapsed.
    pub async fn wait(&mut self, cancel: &CancellationToken) -> bool {
        let delay = self.next_delay();
        debug!(
            attempt = self.attempts,
            delay_ms = delay.as_millis() as u64,
            "backing off"
        );

        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => !cancel.is_cancelled(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backoff() -> Backoff {
        Backoff::new(BackoffConfig::new(
            Duration::from_millis(10),
            Duration::from_millis(80),
        ))
    }

    #[test]
    fn delays_grow_to_ceiling() {
        let mut backoff = backoff();
        let delays: Vec<_> = (0..6).map(|_| backoff.next_delay()).collect();

        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(delays[0], Duration::from_millis(10));
        assert_eq!(delays[3], Duration::from_millis(80));
        assert_eq!(delays[5], Duration::from_millis(80));
        assert_eq!(backoff.attempts(), 6);
    }

    #[test]
    fn reset_restarts_from_initial_delay() {
        let mut backoff = backoff();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();

        backoff.reset();
        assert_eq!(backoff.attempts(), 0);
        assert_eq!(backoff.next_delay(), Duration::from_millis(10));
    }

    #[tokio::test]
    async fn wait_sleeps_then_returns_true() {
        let mut backoff = backoff();
        let cancel = CancellationToken::new();

        assert!(backoff.wait(&cancel).await);
        assert_eq!(backoff.attempts(), 1);
    }

    #[tokio::test]
    async fn wait_observes_cancellation() {
        let mut backoff = Backoff::new(BackoffConfig::new(
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let cancel = CancellationToken::new();
        cancel.cancel();

        assert!(!backoff.wait(&cancel).await);
    }
}
