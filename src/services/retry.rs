use std::future::Future;
use std::time::Duration;

use tokio::time::{sleep, timeout};

use crate::{error::PayoutError, services::ChainRpcError};

/// Retry settings for read-only prerequisite fetches (gas price, nonce seed).
///
/// Never used for calls with side effects.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub attempt_timeout: Duration,
    pub initial_backoff: Duration,
    pub backoff_multiplier: u32,
}

impl RetryPolicy {
    pub fn new(attempts: u32, attempt_timeout: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            attempt_timeout,
            initial_backoff: Duration::from_millis(250),
            backoff_multiplier: 2,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(15))
    }
}

pub async fn fetch_with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    what: &'static str,
    mut fetch: F,
) -> Result<T, PayoutError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ChainRpcError>>,
{
    let mut backoff = policy.initial_backoff;
    let mut last_error = String::new();

    for attempt in 1..=policy.attempts {
        match timeout(policy.attempt_timeout, fetch()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(ChainRpcError::Rejected(reason))) => {
                // The node answered; asking again will not change the answer.
                return Err(PayoutError::ChainLegFailed(format!(
                    "{} rejected by node: {}",
                    what, reason
                )));
            }
            Ok(Err(ChainRpcError::Unavailable(reason))) => last_error = reason,
            Err(_) => {
                last_error = format!("timed out after {}ms", policy.attempt_timeout.as_millis())
            }
        }

        if attempt < policy.attempts {
            tracing::warn!(
                what = what,
                attempt = attempt,
                max_attempts = policy.attempts,
                error = %last_error,
                next_retry_in_ms = backoff.as_millis() as u64,
                "Prerequisite fetch failed, will retry"
            );
            sleep(backoff).await;
            backoff *= policy.backoff_multiplier;
        }
    }

    Err(PayoutError::NetworkUnavailable(format!(
        "{} failed after {} attempts: {}",
        what, policy.attempts, last_error
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_failures_then_succeeds() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(3, Duration::from_secs(1));

        let value = fetch_with_retry(&policy, "gas price", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ChainRpcError::Unavailable("connection reset".into()))
                } else {
                    Ok(42u64)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_timeouts_surface_as_network_unavailable() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(2, Duration::from_millis(100));

        let err = fetch_with_retry(&policy, "gas price", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                sleep(Duration::from_secs(60)).await;
                Ok::<u64, ChainRpcError>(1)
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PayoutError::NetworkUnavailable(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn node_rejections_are_not_retried() {
        let calls = AtomicU32::new(0);
        let policy = RetryPolicy::new(5, Duration::from_secs(1));

        let err = fetch_with_retry(&policy, "transaction count", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<u64, _>(ChainRpcError::Rejected("method not found".into())) }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PayoutError::ChainLegFailed(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
