//! Bounded exponential backoff for transient store and provider failures.

use std::future::Future;
use std::time::Duration;

use crate::config::RetrySettings;

const MAX_DELAY: Duration = Duration::from_secs(30);

/// Retry schedule shared by the store and embedding clients.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_delay: Duration,
    /// Upper bound for any single delay.
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// A policy that performs exactly one attempt.
    pub const fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
        }
    }

    fn delay_for(&self, retry: u32) -> Duration {
        let factor = 1u32.checked_shl(retry.min(16)).unwrap_or(u32::MAX);
        self.initial_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: MAX_DELAY,
        }
    }
}

impl From<&RetrySettings> for RetryPolicy {
    fn from(settings: &RetrySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            initial_delay: settings.initial_delay,
            max_delay: MAX_DELAY,
        }
    }
}

/// Classifies errors that are worth another attempt.
pub trait Retryable {
    /// Returns true for timeouts, dropped connections, throttling and server-side failures.
    fn is_retryable(&self) -> bool;
}

impl Retryable for reqwest::Error {
    fn is_retryable(&self) -> bool {
        if self.is_timeout() || self.is_connect() || self.is_request() {
            return true;
        }
        self.status()
            .map(|status| status.as_u16() == 429 || status.is_server_error())
            .unwrap_or(false)
    }
}

/// Run `operation` until it succeeds, fails permanently, or the attempt budget is spent.
///
/// The last error is returned unchanged when every attempt fails.
pub async fn with_retry<T, E, F, Fut>(policy: &RetryPolicy, what: &str, mut operation: F) -> Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= policy.max_attempts || !error.is_retryable() {
                    return Err(error);
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::warn!(
                    operation = what,
                    attempt,
                    max_attempts = policy.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}
