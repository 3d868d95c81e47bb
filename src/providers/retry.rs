//! Bounded retry with exponential backoff for provider network calls.
//!
//! Only transient transport-class failures are retried. Business rejections
//! and malformed provider responses fail immediately; they would fail the
//! same way on every attempt.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{AppError, AppResult};
use crate::providers::registry::ProviderName;

/// Classified failure of a single provider call attempt.
#[derive(Debug)]
pub enum CallError {
    /// Network/timeout/5xx class failure, eligible for another attempt.
    Transient(String),
    /// Provider answered but the exchange cannot succeed; never retried.
    Rejected(String),
}

impl CallError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Backoff before the given retry: 1s, 2s, 4s, ...
    fn delay_before_attempt(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op` up to `policy.max_attempts` times, sleeping between transient
/// failures. Exhaustion surfaces as `ProviderUnavailable`.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    provider: ProviderName,
    operation: &'static str,
    mut op: F,
) -> AppResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CallError>>,
{
    let mut last_error = String::new();

    for attempt in 1..=policy.max_attempts {
        match op().await {
            Ok(value) => return Ok(value),
            Err(CallError::Rejected(message)) => {
                return Err(AppError::ProviderUnavailable {
                    provider: provider.to_string(),
                    message,
                });
            }
            Err(CallError::Transient(message)) => {
                last_error = message;
                if attempt < policy.max_attempts {
                    let delay = policy.delay_before_attempt(attempt);
                    warn!(
                        provider = %provider,
                        operation,
                        attempt,
                        max_attempts = policy.max_attempts,
                        delay_secs = delay.as_secs(),
                        error = %last_error,
                        "provider call failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    Err(AppError::ProviderUnavailable {
        provider: provider.to_string(),
        message: format!(
            "{} failed after {} attempts: {}",
            operation, policy.max_attempts, last_error
        ),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried_up_to_the_budget() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: AppResult<()> =
            with_retry(&policy, ProviderName::HostedCheckout, "capture", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::transient("connection reset")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(matches!(
            result,
            Err(AppError::ProviderUnavailable { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_failures_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result: AppResult<()> =
            with_retry(&policy, ProviderName::CardDirect, "refund", || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(CallError::rejected("malformed response")) }
            })
            .await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(result.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn success_after_a_transient_failure_returns_the_value() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::default();

        let result = with_retry(&policy, ProviderName::HostedCheckout, "session", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(CallError::transient("timeout"))
                } else {
                    Ok(42u32)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
