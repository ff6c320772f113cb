use crate::error::{FetchError, Result};
use depshift_core::NetworkConfig;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Fixed-backoff retry of transient failures.
///
/// Permanent failures return at once. Without `max_attempts` a transient
/// failure is retried until it succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl From<&NetworkConfig> for RetryPolicy {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            backoff: Duration::from_secs(config.retry_backoff_secs),
            max_attempts: config.max_attempts,
        }
    }
}

impl RetryPolicy {
    pub fn new(backoff: Duration, max_attempts: Option<u32>) -> Self {
        Self {
            backoff,
            max_attempts,
        }
    }

    pub async fn run<T, F, Fut>(&self, url: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    if let Some(max) = self.max_attempts {
                        if attempt >= max {
                            return Err(FetchError::Exhausted {
                                url: url.to_string(),
                                attempts: attempt,
                            });
                        }
                    }
                    warn!(
                        url,
                        attempt,
                        backoff_secs = self.backoff.as_secs_f64(),
                        "Transient failure, retrying: {}",
                        e
                    );
                    tokio::time::sleep(self.backoff).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
