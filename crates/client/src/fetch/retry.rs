//! Retry schedule for transient fetch failures.

use std::future::Future;
use std::time::Duration;

use linkscope_core::Error;
use linkscope_core::config::{AppConfig, RetryBackoff};

/// How many times to attempt a fetch and how long to wait in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Always at least 1.
    pub attempts: u32,
    pub delay: Duration,
    pub backoff: RetryBackoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, delay: Duration::from_secs(2), backoff: RetryBackoff::Fixed }
    }
}

impl From<&AppConfig> for RetryPolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            attempts: config.retry_count.max(1),
            delay: config.retry_delay(),
            backoff: config.retry_backoff,
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no waiting.
    pub fn none() -> Self {
        Self { attempts: 1, delay: Duration::ZERO, backoff: RetryBackoff::Fixed }
    }

    /// Delay before retry number `retry` (1-based).
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            RetryBackoff::Fixed => self.delay,
            RetryBackoff::Incremental => self.delay.saturating_mul(retry),
        }
    }

    /// Run `op` until it succeeds, fails with a non-transient error, or the
    /// attempts run out. The last error is returned.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, Error>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let attempts = self.attempts.max(1);
        let mut attempt = 1;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < attempts && e.is_transient() => {
                    let wait = self.delay_for(attempt);
                    tracing::warn!(
                        url = label,
                        attempt,
                        max_attempts = attempts,
                        wait_ms = wait.as_millis() as u64,
                        error = %e,
                        "Transient fetch failure; retrying"
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn quick(attempts: u32) -> RetryPolicy {
        RetryPolicy { attempts, delay: Duration::from_millis(1), backoff: RetryBackoff::Fixed }
    }

    #[test]
    fn test_delay_schedule() {
        let fixed = RetryPolicy {
            attempts: 4,
            delay: Duration::from_millis(100),
            backoff: RetryBackoff::Fixed,
        };
        assert_eq!(fixed.delay_for(1), Duration::from_millis(100));
        assert_eq!(fixed.delay_for(3), Duration::from_millis(100));

        let incremental = RetryPolicy { backoff: RetryBackoff::Incremental, ..fixed };
        assert_eq!(incremental.delay_for(1), Duration::from_millis(100));
        assert_eq!(incremental.delay_for(3), Duration::from_millis(300));
    }

    #[test]
    fn test_from_config() {
        let config = AppConfig { retry_count: 0, retry_delay_ms: 250, ..Default::default() };
        let policy = RetryPolicy::from(&config);
        assert_eq!(policy.attempts, 1);
        assert_eq!(policy.delay, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = AtomicU32::new(0);
        let result = quick(3)
            .run("test", || async {
                if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::FetchTimeout("slow".into()))
                } else {
                    Ok(7)
                }
            })
            .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = quick(3)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::HttpStatus(503))
            })
            .await;
        assert!(matches!(result, Err(Error::HttpStatus(503))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_non_transient_not_retried() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = quick(5)
            .run("test", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::HttpStatus(404))
            })
            .await;
        assert!(matches!(result, Err(Error::HttpStatus(404))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
