//! Exponential backoff with jitter, shared by any component that retries
//! a fallible operation against a resource it does not own outright
//! (the embedded store, an upstream token endpoint).

use std::time::Duration;

/// A retry policy: initial delay, multiplicative base, a hard cap, and a
/// maximum attempt count.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub initial_delay: Duration,
    pub base: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(100),
            base: 2.0,
            max_delay: Duration::from_secs(5),
            max_attempts: 3,
        }
    }
}

impl RetryPolicy {
    pub fn new(initial_delay: Duration, base: f64, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            initial_delay,
            base,
            max_delay,
            max_attempts,
        }
    }

    /// Delay before the given attempt (0-indexed), with up to 50% jitter
    /// applied on top of the exponential curve.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = self.base.powi(attempt as i32);
        let raw_millis = (self.initial_delay.as_millis() as f64 * exp).min(self.max_delay.as_millis() as f64);
        let jitter = rand::random::<f64>() * 0.5 * raw_millis;
        Duration::from_millis((raw_millis + jitter) as u64)
    }
}

/// Retry an async, fallible operation under this policy. `should_retry`
/// decides whether a given error is worth retrying at all (permanent
/// failures like constraint violations should not loop the full attempt
/// budget).
pub async fn retry_with_backoff<T, E, F, Fut, R>(
    policy: RetryPolicy,
    mut should_retry: R,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    R: FnMut(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts || !should_retry(&err) {
                    return Err(err);
                }
                tokio::time::sleep(policy.delay_for(attempt - 1)).await;
            }
        }
    }
}
