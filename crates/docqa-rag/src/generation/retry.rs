//! Retry with exponential backoff for provider HTTP calls

use reqwest::StatusCode;
use std::future::Future;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{Error, Result};

/// Retry policy shared by the embedding and LLM clients.
///
/// Attempt `n` (0-based) that fails with a retryable error waits
/// `base_delay * 2^n` before the next attempt.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    max_retries: u32,
    base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay;
        self
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before the retry that follows failed attempt `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Run `operation` until it succeeds, fails with a non-retryable error,
    /// or runs out of attempts
    pub async fn run<F, Fut, T>(&self, label: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    let delay = self.delay_for(attempt);
                    tracing::warn!(
                        "{} failed (attempt {}/{}): {}, retrying in {:?}",
                        label,
                        attempt + 1,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Map an unsuccessful HTTP status from a provider to an error.
///
/// Rate limits, timeouts and server errors become provider errors (retryable);
/// rejected credentials are configuration errors; other client errors are
/// internal.
pub fn status_error(
    provider: &str,
    status: StatusCode,
    body: &str,
    provider_error: fn(String) -> Error,
) -> Error {
    let body = body.trim();
    let message = if body.is_empty() {
        format!("{} returned HTTP {}", provider, status)
    } else {
        format!("{} returned HTTP {}: {}", provider, status, body)
    };

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::Config(message),
        StatusCode::TOO_MANY_REQUESTS | StatusCode::REQUEST_TIMEOUT => provider_error(message),
        s if s.is_server_error() => provider_error(message),
        _ => Error::Internal(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast(max_retries: u32) -> RetryPolicy {
        RetryPolicy::new(max_retries).with_base_delay(Duration::from_millis(1))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::new(3);
        assert_eq!(policy.delay_for(0), Duration::from_secs(1));
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_retries_transient_errors_until_success() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result = fast(2)
            .run("test call", move || async move {
                if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(Error::llm("rate limited"))
                } else {
                    Ok("done")
                }
            })
            .await;
        assert_eq!(result.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(1)
            .run("test call", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::embedding("timeout"))
            })
            .await;
        assert!(matches!(result, Err(Error::Embedding(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_does_not_retry_permanent_errors() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = fast(3)
            .run("test call", move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(Error::Config("bad key".into()))
            })
            .await;
        assert!(matches!(result, Err(Error::Config(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_classification() {
        let rate_limited = status_error("gemini", StatusCode::TOO_MANY_REQUESTS, "", Error::Llm);
        assert!(rate_limited.is_retryable());
        let unavailable = status_error("gemini", StatusCode::SERVICE_UNAVAILABLE, "busy", Error::Llm);
        assert!(unavailable.to_string().contains("busy"));
        assert!(unavailable.is_retryable());
        assert!(matches!(
            status_error("gemini", StatusCode::FORBIDDEN, "", Error::Llm),
            Error::Config(_)
        ));
        assert!(!status_error("ollama", StatusCode::NOT_FOUND, "", Error::Embedding).is_retryable());
    }
}
