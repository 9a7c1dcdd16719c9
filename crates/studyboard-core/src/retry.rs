//! Retry policy for failed reads

use std::future::Future;
use std::time::Duration;

use studyboard_api::{ClientError, Result};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Fail on the first error (detail and list views)
    #[default]
    Never,
    /// Exponential backoff starting at `initial`, capped at `max`
    Backoff {
        initial: Duration,
        max: Duration,
        attempts: u32,
    },
}

impl RetryPolicy {
    /// Policy used by sortable child lists: 5s, 10s, 20s, then 30s
    pub fn child_list() -> Self {
        RetryPolicy::Backoff {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(30),
            attempts: 4,
        }
    }

    /// Delay before retry number `attempt` (0-based), or `None` when the
    /// policy gives up
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            RetryPolicy::Never => None,
            RetryPolicy::Backoff {
                initial,
                max,
                attempts,
            } => {
                if attempt >= attempts {
                    return None;
                }
                let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
                Some(initial.checked_mul(factor).unwrap_or(max).min(max))
            }
        }
    }

    /// Runs `op` until it succeeds, the policy gives up, or the error is one
    /// that retrying cannot fix
    pub async fn run<T, F, Fut>(&self, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if !is_retryable(&e) => return Err(e),
                Err(e) => match self.delay(attempt) {
                    Some(delay) => {
                        warn!(
                            "[RetryPolicy] attempt {} failed: {} - retrying in {:?}",
                            attempt + 1,
                            e,
                            delay
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                    }
                    None => return Err(e),
                },
            }
        }
    }
}

fn is_retryable(error: &ClientError) -> bool {
    match error {
        ClientError::Transport { .. } => true,
        ClientError::Api { status, .. } => *status >= 500 || *status == 429,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_child_list_delays() {
        let policy = RetryPolicy::child_list();
        let secs: Vec<_> = (0..5)
            .map(|n| policy.delay(n).map(|d| d.as_secs()))
            .collect();
        assert_eq!(secs, vec![Some(5), Some(10), Some(20), Some(30), None]);
    }

    #[test]
    fn test_never_retries() {
        assert_eq!(RetryPolicy::Never.delay(0), None);
    }

    #[test]
    fn test_large_attempts_stay_capped() {
        let policy = RetryPolicy::Backoff {
            initial: Duration::from_secs(5),
            max: Duration::from_secs(30),
            attempts: u32::MAX,
        };
        assert_eq!(policy.delay(40), Some(Duration::from_secs(30)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_retries_transport_errors() {
        let calls = AtomicU32::new(0);
        let result = RetryPolicy::child_list()
            .run(|| async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ClientError::transport("connection reset"))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_run_does_not_retry_not_found() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = RetryPolicy::child_list()
            .run(|| async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::NotFound {
                    path: "/steps/x".to_string(),
                })
            })
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
