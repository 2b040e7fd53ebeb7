//! 재시도 정책 - explicit backoff value object plus an async retry combinator
//!
//! The policy is pure arithmetic so it can be tested without running anything;
//! `with_retry` re-invokes a unit of work and sleeps between attempts, racing
//! every sleep against the crawl's cancellation token.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::infrastructure::config::RetryConfig;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff_factor: f64,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            backoff_factor: config.backoff_factor,
            max_delay: Duration::from_millis(config.max_delay_ms),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    /// Delay after the given failed attempt (0-based): `initial * factor^attempt`, capped.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        #[allow(clippy::cast_precision_loss)]
        let nanos = self.initial_delay.as_nanos() as f64 * self.backoff_factor.powi(exponent);
        #[allow(clippy::cast_precision_loss)]
        let cap = self.max_delay.as_nanos() as f64;
        if !nanos.is_finite() || nanos >= cap {
            return self.max_delay;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let nanos = nanos.round().max(0.0) as u64;
        Duration::from_nanos(nanos)
    }
}

#[derive(Error, Debug, PartialEq)]
pub enum RetryError<E: Display> {
    #[error("Cancelled while waiting to retry")]
    Cancelled,

    #[error("Gave up after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: E },

    #[error("{0}")]
    Permanent(E),
}

impl<E: Display> RetryError<E> {
    /// The underlying error of the final attempt, if any.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Cancelled => None,
            Self::Exhausted { last, .. } | Self::Permanent(last) => Some(last),
        }
    }
}

/// Run `op` until it succeeds, a non-retryable error occurs, or attempts run out.
///
/// `op` receives the 0-based attempt number.
pub async fn with_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    token: &CancellationToken,
    is_retryable: impl Fn(&E) -> bool,
    mut op: F,
) -> Result<T, RetryError<E>>
where
    E: Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        if token.is_cancelled() {
            return Err(RetryError::Cancelled);
        }
        match op(attempt).await {
            Ok(value) => {
                if attempt > 0 {
                    debug!("✅ Succeeded on attempt {}", attempt + 1);
                }
                return Ok(value);
            }
            Err(e) if !is_retryable(&e) => return Err(RetryError::Permanent(e)),
            Err(e) if attempt + 1 >= max_attempts => {
                return Err(RetryError::Exhausted {
                    attempts: attempt + 1,
                    last: e,
                });
            }
            Err(e) => {
                let delay = policy.delay_for_attempt(attempt);
                warn!(
                    "🔄 Attempt {}/{} failed: {}. Retrying in {:?}",
                    attempt + 1,
                    max_attempts,
                    e,
                    delay
                );
                tokio::select! {
                    () = token.cancelled() => return Err(RetryError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::cell::Cell;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            backoff_factor: 2.0,
            max_delay: Duration::from_millis(500),
        }
    }

    #[rstest]
    #[case(0, 100)]
    #[case(1, 200)]
    #[case(2, 400)]
    #[case(3, 500)]
    #[case(40, 500)]
    fn exponential_delay_is_capped(#[case] attempt: u32, #[case] millis: u64) {
        assert_eq!(policy(3).delay_for_attempt(attempt), Duration::from_millis(millis));
    }

    #[test]
    fn config_conversion() {
        let policy = RetryPolicy::from(&RetryConfig {
            max_attempts: 0,
            initial_delay_ms: 250,
            backoff_factor: 3.0,
            max_delay_ms: 1_000,
        });
        assert_eq!(policy.max_attempts, 1);
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(750));
    }

    fn fast(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::ZERO,
            backoff_factor: 1.0,
            max_delay: Duration::ZERO,
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = Cell::new(0);
        let token = CancellationToken::new();
        let result = with_retry(&fast(3), &token, |_: &String| true, |attempt| {
            calls.set(calls.get() + 1);
            async move {
                if attempt < 2 { Err(format!("boom {attempt}")) } else { Ok(attempt) }
            }
        })
        .await;
        assert_eq!(result, Ok(2));
        assert_eq!(calls.get(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let token = CancellationToken::new();
        let result: Result<(), _> =
            with_retry(&fast(2), &token, |_: &String| true, |_| async { Err("nope".to_string()) }).await;
        assert_eq!(
            result,
            Err(RetryError::Exhausted {
                attempts: 2,
                last: "nope".to_string()
            })
        );
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = Cell::new(0);
        let token = CancellationToken::new();
        let result: Result<(), _> = with_retry(&fast(5), &token, |e: &String| e != "fatal", |_| {
            calls.set(calls.get() + 1);
            async { Err("fatal".to_string()) }
        })
        .await;
        assert_eq!(result, Err(RetryError::Permanent("fatal".to_string())));
        assert_eq!(calls.get(), 1);
    }

    #[tokio::test]
    async fn cancelled_token_stops_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        let result: Result<(), RetryError<String>> =
            with_retry(&fast(3), &token, |_| true, |_| async { Ok(()) }).await;
        assert_eq!(result, Err(RetryError::Cancelled));
    }
}
