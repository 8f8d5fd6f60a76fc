//! Bounded retries for checks that depend on eventually consistent state.
//!
//! A [Retry] is a wall-clock deadline plus a fixed poll interval (there is no
//! backoff). The wrapped operation is invoked until it succeeds. When it fails
//! after the deadline has passed, that failure is returned as-is: callers see
//! the real root cause ("no messages found", "connection refused") rather than a
//! synthetic timeout.
//!
//! The same primitive guards sub-second transport retries and multi-minute
//! waits (peer discovery, RLN registration), so the deadline chosen at each call
//! site encodes how long that effect is expected to take to propagate.
//!
//! # Example
//!
//! ```rust
//! use std::time::Duration;
//! use waku_interop_utils::Retry;
//!
//! # async fn example() -> Result<(), String> {
//! let policy = Retry::new(Duration::from_secs(5), Duration::from_millis(100));
//! let value = policy.run(|| async { Ok::<_, String>(42) }).await?;
//! assert_eq!(value, 42);
//! # Ok(())
//! # }
//! ```

use std::{fmt::Display, future::Future, time::Duration};
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

/// Deadline and poll interval for a bounded retry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Retry {
    timeout: Duration,
    interval: Duration,
}

impl Retry {
    /// Retry for at most `timeout`, sleeping `interval` between attempts.
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Shorthand for whole-second deadlines with a millisecond interval.
    pub const fn secs(timeout: u64, interval_ms: u64) -> Self {
        Self::new(
            Duration::from_secs(timeout),
            Duration::from_millis(interval_ms),
        )
    }

    /// Total wall-clock budget.
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Pause between a failed attempt and the next one.
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Returns a copy of this policy with a different deadline.
    pub const fn with_timeout(self, timeout: Duration) -> Self {
        Self::new(timeout, self.interval)
    }

    /// Invoke `op` until it succeeds or the deadline passes.
    ///
    /// On timeout the most recent error is returned unchanged.
    pub async fn run<T, E, F, Fut>(&self, op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        self.run_if(op, |_| true).await
    }

    /// Like [Retry::run], but only errors for which `retryable` returns `true`
    /// are retried. Any other error is returned immediately.
    pub async fn run_if<T, E, F, Fut, P>(&self, mut op: F, retryable: P) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let start = Instant::now();
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let err = match op().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            if !retryable(&err) {
                return Err(err);
            }

            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                debug!(
                    attempt,
                    elapsed_ms = elapsed.as_millis() as u64,
                    error = %err,
                    "retry deadline exceeded"
                );
                return Err(err);
            }
            trace!(attempt, error = %err, "attempt failed");
            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        cell::Cell,
        sync::atomic::{AtomicU32, Ordering},
    };

    #[tokio::test(start_paused = true)]
    async fn test_returns_first_success() {
        let policy = Retry::secs(5, 100);
        let start = Instant::now();
        let result: Result<u32, String> = policy.run(|| async { Ok(7) }).await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failures() {
        let attempts = AtomicU32::new(0);
        let policy = Retry::secs(5, 100);
        let result = policy
            .run(|| async {
                let n = attempts.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 4 {
                    Err(format!("attempt {n} failed"))
                } else {
                    Ok(n)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 4);
        assert_eq!(attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_bounds_and_last_error() {
        let timeout = Duration::from_secs(2);
        let interval = Duration::from_millis(300);
        let policy = Retry::new(timeout, interval);

        let attempts = Cell::new(0u32);
        let start = Instant::now();
        let result: Result<(), String> = policy
            .run(|| {
                attempts.set(attempts.get() + 1);
                let n = attempts.get();
                async move { Err(format!("no messages found (attempt {n})")) }
            })
            .await;
        let elapsed = start.elapsed();

        // Never gives up before the deadline, never overshoots by more than one interval
        assert!(elapsed >= timeout, "gave up early: {elapsed:?}");
        assert!(elapsed <= timeout + interval, "overshot: {elapsed:?}");

        // The error is the one produced by the final attempt
        let n = attempts.get();
        assert!(n > 1);
        assert_eq!(
            result.unwrap_err(),
            format!("no messages found (attempt {n})")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_retryable_error_is_immediate() {
        let attempts = AtomicU32::new(0);
        let policy = Retry::secs(60, 100);
        let start = Instant::now();
        let result: Result<(), String> = policy
            .run_if(
                || async {
                    attempts.fetch_add(1, Ordering::SeqCst);
                    Err("400 Bad Request".to_string())
                },
                |err| !err.contains("Bad Request"),
            )
            .await;
        assert_eq!(result.unwrap_err(), "400 Bad Request");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_timeout_runs_once() {
        let attempts = AtomicU32::new(0);
        let policy = Retry::new(Duration::ZERO, Duration::from_millis(100));
        let result: Result<(), &str> = policy
            .run(|| async {
                attempts.fetch_add(1, Ordering::SeqCst);
                Err("down")
            })
            .await;
        assert_eq!(result.unwrap_err(), "down");
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_accessors() {
        let policy = Retry::secs(60, 100);
        assert_eq!(policy.timeout(), Duration::from_secs(60));
        assert_eq!(policy.interval(), Duration::from_millis(100));
        let shorter = policy.with_timeout(Duration::from_secs(5));
        assert_eq!(shorter.timeout(), Duration::from_secs(5));
        assert_eq!(shorter.interval(), Duration::from_millis(100));
    }
}
