//! Bounded retry with fixed backoff for collaborator calls.

use backon::{ConstantBuilder, Retryable};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;

use crate::collaborators::CollaboratorError;

/// All attempts failed, or a non-retryable failure stopped the loop.
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{operation} failed after {attempts} attempts: {last}")]
pub struct RetryExhausted {
    pub operation: &'static str,
    pub attempts: u32,
    pub last: CollaboratorError,
}

/// Retry envelope: fixed delay between at most `max_attempts` tries, each
/// optionally bounded by `call_timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub call_timeout: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            call_timeout: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            backoff,
            call_timeout: None,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.call_timeout = timeout;
        self
    }

    fn backoff_builder(&self) -> ConstantBuilder {
        ConstantBuilder::default()
            .with_delay(self.backoff)
            .with_max_times(self.max_attempts.saturating_sub(1) as usize)
    }

    /// Run `call` until it succeeds, fails with a non-retryable error, or
    /// the attempt budget is spent.
    pub async fn run<T, F, Fut>(&self, operation: &'static str, mut call: F) -> Result<T, RetryExhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, CollaboratorError>>,
    {
        let attempts = AtomicU32::new(0);
        let call_timeout = self.call_timeout;

        let attempt = || {
            attempts.fetch_add(1, Ordering::Relaxed);
            let fut = call();
            async move {
                match call_timeout {
                    Some(limit) => tokio::time::timeout(limit, fut)
                        .await
                        .map_err(|_| CollaboratorError::Timeout(limit))?,
                    None => fut.await,
                }
            }
        };

        attempt
            .retry(self.backoff_builder())
            .sleep(tokio::time::sleep)
            .when(|e: &CollaboratorError| e.is_retryable())
            .notify(|e: &CollaboratorError, delay: Duration| {
                tracing::warn!(
                    operation,
                    attempt = attempts.load(Ordering::Relaxed),
                    error = %e,
                    delay_ms = delay.as_millis() as u64,
                    "collaborator call failed, retrying"
                );
            })
            .await
            .map_err(|last| RetryExhausted {
                operation,
                attempts: attempts.load(Ordering::Relaxed),
                last,
            })
    }
}
