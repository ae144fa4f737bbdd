//! Bounded exponential backoff for transient backend failures.

use crate::config::RetryConfig;
use crate::error::Result;
use std::future::Future;
use tracing::warn;

/// Run `op` up to `policy.max_attempts` times, doubling the delay after each
/// failure. Returns the last error once attempts are exhausted; callers decide
/// whether exhaustion degrades the unit of work or fails the job.
pub async fn with_backoff<T, F, Fut>(op_name: &str, policy: &RetryConfig, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut delay = policy.initial_delay();
    let mut attempt = 0;

    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.max_attempts => {
                warn!(
                    "{op_name} failed (attempt {attempt}/{}): {e}; retrying in {:?}",
                    policy.max_attempts, delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(e) => {
                warn!(
                    "{op_name} failed after {} attempts: {e}",
                    policy.max_attempts
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            initial_delay_ms: 1,
        }
    }

    #[tokio::test]
    async fn test_succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let result = with_backoff("test", &fast_policy(3), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(Error::Transcription("transient".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .await;

        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_returns_last_error() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_backoff("test", &fast_policy(2), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(Error::Transcription("down".to_string())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
