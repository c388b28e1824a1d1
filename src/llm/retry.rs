// Timeout + bounded exponential backoff around provider calls.
// Retries apply to transient failures only; malformed responses are
// returned immediately since retrying cannot fix them.

use std::future::Future;

use crate::config::RetryPolicy;

use super::provider::ProviderError;

/// Run `op` under the policy's per-call timeout, retrying transient failures
/// with exponential backoff up to `max_retries` extra attempts.
pub async fn with_retry<T, F, Fut>(policy: &RetryPolicy, mut op: F) -> Result<T, ProviderError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ProviderError>>,
{
    let mut attempt: u32 = 0;

    loop {
        let outcome = tokio::time::timeout(policy.per_call_timeout(), op()).await;

        let err = match outcome {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => err,
            Err(_) => ProviderError::Timeout(policy.per_call_timeout()),
        };

        if !err.is_transient() || attempt >= policy.max_retries {
            return Err(err);
        }

        let delay = policy.base_delay() * 2u32.saturating_pow(attempt);
        tracing::debug!(
            "provider call failed ({}), retrying in {:?} (attempt {}/{})",
            err,
            delay,
            attempt + 1,
            policy.max_retries
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            per_call_timeout_ms: 1_000,
        }
    }

    #[tokio::test]
    async fn succeeds_first_try() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, ProviderError>(42) }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_rate_limit_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retry(&fast_policy(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(ProviderError::RateLimited)
                } else {
                    Ok("done")
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::Unavailable("down".into())) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Unavailable(_))));
        // 1 initial attempt + 2 retries
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn malformed_response_is_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&fast_policy(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ProviderError::MalformedResponse("bad json".into())) }
        })
        .await;
        assert!(matches!(result, Err(ProviderError::MalformedResponse(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn slow_call_times_out() {
        let policy = RetryPolicy {
            max_retries: 0,
            base_delay_ms: 1,
            per_call_timeout_ms: 10,
        };
        let result: Result<(), _> = with_retry(&policy, || async {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(())
        })
        .await;
        assert!(matches!(result, Err(ProviderError::Timeout(_))));
    }
}
