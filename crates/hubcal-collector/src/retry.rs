//! The shared retry primitive.
//!
//! Every outbound call goes through [`retry`]: a fixed wait between
//! attempts, a bounded number of attempts and an overall deadline. Only
//! retryable errors are retried.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{CollectorError, CollectorResult};
use crate::fetch::{FetchedBody, HttpFetcher};

/// Retry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait between attempts.
    pub wait: Duration,
    /// Maximum attempts, including the first.
    pub max_attempts: u32,
    /// Deadline for all attempts together.
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(1),
            max_attempts: 10,
            timeout: Duration::from_secs(100),
        }
    }
}

impl RetryPolicy {
    /// The slower policy used for the eventful API.
    pub fn eventful() -> Self {
        Self {
            wait: Duration::from_secs(3),
            max_attempts: 10,
            timeout: Duration::from_secs(60),
        }
    }

    /// A single attempt, no waiting.
    pub fn once() -> Self {
        Self {
            wait: Duration::ZERO,
            max_attempts: 1,
            timeout: Duration::from_secs(100),
        }
    }
}

/// Runs `op` until it succeeds, fails permanently, runs out of attempts or
/// exceeds the policy's deadline.
pub async fn retry<T, F, Fut>(policy: &RetryPolicy, what: &str, mut op: F) -> CollectorResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = CollectorResult<T>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let attempts = async {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(what, attempt, "succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    warn!(what, attempt, error = %e, "attempt failed, retrying");
                    tokio::time::sleep(policy.wait).await;
                }
                Err(e) => return Err(e),
            }
        }
    };

    match tokio::time::timeout(policy.timeout, attempts).await {
        Ok(result) => result,
        Err(_) => Err(CollectorError::timeout(format!(
            "gave up on {what} after {}s",
            policy.timeout.as_secs()
        ))),
    }
}

/// Fetches a URL under a retry policy.
pub async fn fetch_with_retry(
    fetcher: &dyn HttpFetcher,
    url: &str,
    policy: &RetryPolicy,
) -> CollectorResult<FetchedBody> {
    retry(policy, url, || fetcher.get(url))
        .await
        .map_err(|e| e.with_feed(url))
}
