use crate::types::{ModelError, PipelineError};
use backoff::{backoff::Backoff, exponential::ExponentialBackoff, SystemClock};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Attempt ceiling and backoff schedule shared by every outbound call site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
    /// Randomization factor in `[0, 1)`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 2_000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// No waiting between attempts. Used by tests and dry runs.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay_ms: 0,
            multiplier: 1.0,
            max_delay_ms: 0,
            jitter: 0.0,
        }
    }

    fn backoff(&self) -> ExponentialBackoff<SystemClock> {
        let initial = Duration::from_millis(self.initial_delay_ms);
        ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            randomization_factor: self.jitter.clamp(0.0, 0.99),
            multiplier: self.multiplier.max(1.0),
            max_interval: Duration::from_millis(self.max_delay_ms.max(self.initial_delay_ms)),
            // The attempt ceiling bounds the loop, not elapsed time
            max_elapsed_time: None,
            ..Default::default()
        }
    }
}

/// Errors that know whether another attempt could succeed.
pub trait Retryable {
    fn is_retryable(&self) -> bool;
}

impl Retryable for ModelError {
    fn is_retryable(&self) -> bool {
        match self {
            ModelError::Timeout { .. }
            | ModelError::RateLimited(_)
            | ModelError::Malformed(_)
            | ModelError::Http(_) => true,
            ModelError::Status { status, .. } => *status >= 500,
            ModelError::Unsupported(_) => false,
        }
    }
}

impl Retryable for PipelineError {
    fn is_retryable(&self) -> bool {
        match self {
            PipelineError::Http(_) => true,
            PipelineError::HttpStatus { status, .. } => *status == 429 || *status >= 500,
            PipelineError::Model(error) => error.is_retryable(),
            _ => false,
        }
    }
}

/// Run `operation` until it succeeds, fails with a non-retryable error, or
/// the policy's attempt ceiling is reached. The last error is returned.
pub async fn retry<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut operation: F) -> std::result::Result<T, E>
where
    E: Retryable + std::fmt::Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.backoff();
    let mut attempt = 1;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    debug!("{} succeeded on attempt {}", label, attempt);
                }
                return Ok(value);
            }
            Err(e) if attempt < max_attempts && e.is_retryable() => {
                let delay = backoff
                    .next_backoff()
                    .unwrap_or_else(|| Duration::from_millis(policy.max_delay_ms));
                warn!("Attempt {}/{} of {} failed, retrying in {:?}: {}", attempt, max_attempts, label, delay, e);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => {
                if attempt > 1 {
                    warn!("{} gave up after {} attempts: {}", label, attempt, e);
                }
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn stops_at_attempt_ceiling() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), ModelError> = retry(&RetryPolicy::immediate(3), "test call", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(ModelError::Timeout { seconds: 1 }) }
        })
        .await;

        assert!(matches!(result, Err(ModelError::Timeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn does_not_retry_permanent_failures() {
        let calls = AtomicU32::new(0);
        let result: std::result::Result<(), ModelError> = retry(&RetryPolicy::immediate(5), "test call", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(ModelError::Status {
                    status: 401,
                    body: "bad key".to_string(),
                })
            }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovers_after_transient_failure() {
        let calls = AtomicU32::new(0);
        let result = retry(&RetryPolicy::immediate(3), "test call", || {
            let attempt = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 0 {
                    Err(ModelError::Malformed("empty".to_string()))
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;

        assert_eq!(result.ok(), Some(1));
    }
}
