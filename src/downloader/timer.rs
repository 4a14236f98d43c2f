//! Minimum-interval time gate used to stay under the archive's request ceiling.

use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Tracks the time since the last permitted action.
///
/// A fresh limiter counts as elapsed so the very first action is never delayed.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    interval: Duration,
    last_reset: Option<Instant>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_reset: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn has_elapsed(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Suspend until the interval has passed since the last reset.
    pub async fn await_elapsed(&self) {
        let remaining = self.remaining();
        if remaining.is_zero() {
            return;
        }
        debug!("Rate limit: waiting {}ms", remaining.as_millis());
        tokio::time::sleep(remaining).await;
    }

    pub fn reset(&mut self) {
        self.last_reset = Some(Instant::now());
    }

    fn remaining(&self) -> Duration {
        match self.last_reset {
            Some(last) => self.interval.saturating_sub(last.elapsed()),
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_limiter_has_elapsed() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        assert!(limiter.has_elapsed());
    }

    #[test]
    fn test_reset_restarts_interval() {
        let mut limiter = RateLimiter::new(Duration::from_secs(60));
        limiter.reset();
        assert!(!limiter.has_elapsed());
    }

    #[test]
    fn test_zero_interval_is_always_elapsed() {
        let mut limiter = RateLimiter::new(Duration::ZERO);
        limiter.reset();
        assert!(limiter.has_elapsed());
    }

    #[tokio::test]
    async fn test_await_elapsed_waits_out_interval() {
        let interval = Duration::from_millis(50);
        let mut limiter = RateLimiter::new(interval);
        limiter.reset();

        let start = std::time::Instant::now();
        limiter.await_elapsed().await;
        assert!(start.elapsed() >= interval - Duration::from_millis(5));
        assert!(limiter.has_elapsed());
    }

    #[tokio::test]
    async fn test_await_elapsed_returns_immediately_when_elapsed() {
        let limiter = RateLimiter::new(Duration::from_secs(60));
        let start = std::time::Instant::now();
        limiter.await_elapsed().await;
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
