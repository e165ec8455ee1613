//! Bounded retry policy.
//!
//! The watcher retries in exactly one place: record store initialization at
//! startup. Everything else fails fast and is handled by the caller's
//! skip/log policy.
//!
//! # Delay
//!
//! ```text
//! Fixed:        delay
//! Exponential:  min(delay * 2^(attempt-1), max_delay)
//! ```
//!
//! plus a random jitter in `0..=jitter` when jitter is non-zero.

use rand::{Rng, rng};
use std::fmt;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, info, warn};

/// How the delay between attempts grows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// The same delay before every retry.
    Fixed,
    /// Doubling delay, capped at `max_delay`.
    Exponential { max_delay: Duration },
}

/// Bounded retry policy for a fallible async operation.
///
/// # Examples
///
/// ```ignore
/// let policy = RetryPolicy::fixed(5, Duration::from_secs(5));
/// policy.retry("store.initialize", || store.initialize()).await?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never less than 1.
    pub max_attempts: usize,
    /// Delay after the first failure; the base for exponential growth.
    pub delay: Duration,
    /// Growth of the delay between attempts.
    pub backoff: Backoff,
    /// Upper bound of the random delay added to each wait. Zero disables it.
    pub jitter: Duration,
}

impl RetryPolicy {
    /// Retry with a constant `delay` between attempts.
    pub fn fixed(max_attempts: usize, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
            backoff: Backoff::Fixed,
            jitter: Duration::ZERO,
        }
    }

    /// Retry with a delay that doubles per attempt.
    ///
    /// # Arguments
    ///
    /// * `max_attempts` - Total attempts, including the first
    /// * `base_delay` - Delay after the first failure
    /// * `max_delay` - Cap for the doubled delay
    pub fn exponential(max_attempts: usize, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay: base_delay,
            backoff: Backoff::Exponential { max_delay },
            jitter: Duration::ZERO,
        }
    }

    /// Add up to `jitter` of random delay to every wait.
    pub fn with_jitter(mut self, jitter: Duration) -> Self {
        self.jitter = jitter;
        self
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let base = match self.backoff {
            Backoff::Fixed => self.delay,
            Backoff::Exponential { max_delay } => {
                let shift = attempt.saturating_sub(1).min(31) as u32;
                self.delay.saturating_mul(1u32 << shift).min(max_delay)
            }
        };
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms: u64 = rng().random_range(0..=self.jitter.as_millis() as u64);
        base + Duration::from_millis(jitter_ms)
    }

    /// Run `op` until it succeeds or the attempts are used up.
    ///
    /// # Arguments
    ///
    /// * `label` - Name of the operation in log events
    /// * `op` - Produces a fresh future for each attempt
    ///
    /// # Returns
    ///
    /// The first success, or the last error once `max_attempts` have failed.
    pub async fn retry<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: fmt::Display,
    {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(label, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    let total_dt = total_t0.elapsed();
                    if attempt >= self.max_attempts {
                        error!(
                            label,
                            attempt,
                            max = self.max_attempts,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_after(attempt);
                    warn!(
                        label,
                        attempt,
                        max = self.max_attempts,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_fixed_delay_is_constant() {
        let p = RetryPolicy::fixed(5, Duration::from_secs(5));
        assert_eq!(p.delay_after(1), Duration::from_secs(5));
        assert_eq!(p.delay_after(4), Duration::from_secs(5));
    }

    #[test]
    fn test_exponential_delay_is_capped() {
        let p = RetryPolicy::exponential(10, Duration::from_secs(1), Duration::from_secs(30));
        assert_eq!(p.delay_after(1), Duration::from_secs(1));
        assert_eq!(p.delay_after(2), Duration::from_secs(2));
        assert_eq!(p.delay_after(5), Duration::from_secs(16));
        assert_eq!(p.delay_after(6), Duration::from_secs(30));
        assert_eq!(p.delay_after(64), Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_stays_in_bounds() {
        let p = RetryPolicy::fixed(3, Duration::from_millis(100)).with_jitter(Duration::from_millis(50));
        for _ in 0..50 {
            let d = p.delay_after(1);
            assert!(d >= Duration::from_millis(100) && d <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_zero_attempts_means_one() {
        assert_eq!(RetryPolicy::fixed(0, Duration::ZERO).max_attempts, 1);
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_transient_failures() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::fixed(5, Duration::from_millis(1));
        let result: Result<&str, String> = policy
            .retry("flaky", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n < 3 { Err(format!("failure {}", n)) } else { Ok("ready") }
            })
            .await;
        assert_eq!(result.unwrap(), "ready");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let counter = AtomicUsize::new(0);
        let calls = &counter;
        let policy = RetryPolicy::fixed(3, Duration::from_millis(1));
        let result: Result<(), String> = policy
            .retry("down", || async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err(format!("unreachable #{}", n))
            })
            .await;
        assert_eq!(result.unwrap_err(), "unreachable #3");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
