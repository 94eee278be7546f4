// SPDX-License-Identifier: MIT OR Apache-2.0
//! Retry policies with exponential backoff and timeout configuration for
//! adapter calls.
//!
//! Adapter-level transient errors are retried inside the pass; persistent
//! failures surface as pass-level failure. Only [`ErrorCode`]s that report
//! `is_retryable()` are retried.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use gri_error::{ErrorCode, IngestError};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Deterministic exponential backoff: `base * multiplier^(attempt-1)`,
/// capped at `max_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts including the first (≥ 1).
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Upper bound on any single delay.
    pub max_delay: Duration,
    /// Exponential growth factor per attempt.
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn no_retries() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Build from the config-level settings.
    #[must_use]
    pub fn from_settings(max_attempts: u32, base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
            max_delay: Duration::from_millis(max_delay_ms),
            multiplier: 2.0,
        }
    }

    /// Backoff delay applied after the given 1-based failed attempt.
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let factor = self.multiplier.powi(exp as i32);
        let raw = self.base_delay.as_millis() as f64 * factor;
        let capped = raw.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Run `op` with retries, sleeping between attempts.
    ///
    /// Retries only when the returned error's code is retryable; the last
    /// error is surfaced once attempts are exhausted, annotated with the
    /// attempt count.
    pub async fn run<T, F, Fut>(&self, label: &str, mut op: F) -> Result<T, IngestError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, IngestError>>,
    {
        let mut attempt = 1u32;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) if err.code.is_retryable() && attempt < self.max_attempts => {
                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        target: "gri.retry",
                        %label,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(err) => {
                    if attempt > 1 {
                        debug!(target: "gri.retry", %label, attempt, "giving up");
                        return Err(err.with_context("attempts", attempt));
                    }
                    return Err(err);
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// TimeoutConfig
// ---------------------------------------------------------------------------

/// Timeout bounds for a single external call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Applied timeout.
    pub timeout: Duration,
    /// Hard ceiling no caller may exceed.
    pub max_timeout: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_timeout: Duration::from_secs(600),
        }
    }
}

impl TimeoutConfig {
    /// Effective timeout: the configured value clamped to the ceiling.
    #[must_use]
    pub fn effective(&self) -> Duration {
        self.timeout.min(self.max_timeout)
    }
}

/// Await `fut` for at most `timeout`, mapping expiry to a `CANCELLED`
/// error with reason `timeout`.
pub async fn with_timeout<T, Fut>(
    timeout: Duration,
    label: &str,
    fut: Fut,
) -> Result<T, IngestError>
where
    Fut: Future<Output = Result<T, IngestError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(IngestError::new(
            ErrorCode::Cancelled,
            format!("{label} timed out after {} ms", timeout.as_millis()),
        )
        .with_context("reason", "timeout")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = RetryPolicy {
            max_attempts: 10,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(450),
            multiplier: 2.0,
        };
        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_millis(450));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_transient_errors_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let calls2 = calls.clone();
        let result = policy
            .run("embed", move || {
                let calls = calls2.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(IngestError::external("rate limited"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_attempts_surface_last_error() {
        let policy = RetryPolicy::from_settings(3, 10, 100);
        let result: Result<(), _> = policy
            .run("llm", || async { Err(IngestError::external("down")) })
            .await;
        let err = result.unwrap_err();
        assert_eq!(err.code, ErrorCode::ExternalUnavailable);
        assert_eq!(err.context["attempts"], 3);
    }

    #[tokio::test]
    async fn fatal_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let policy = RetryPolicy::default();
        let calls2 = calls.clone();
        let result: Result<(), _> = policy
            .run("extract", move || {
                let calls = calls2.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(IngestError::new(ErrorCode::SourceUnreadable, "truncated pdf"))
                }
            })
            .await;
        assert_eq!(result.unwrap_err().code, ErrorCode::SourceUnreadable);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_cancelled() {
        let err = with_timeout(Duration::from_millis(50), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, IngestError>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.code, ErrorCode::Cancelled);
        assert_eq!(err.context["reason"], "timeout");
    }

    #[test]
    fn effective_timeout_is_clamped() {
        let cfg = TimeoutConfig {
            timeout: Duration::from_secs(900),
            max_timeout: Duration::from_secs(600),
        };
        assert_eq!(cfg.effective(), Duration::from_secs(600));
    }
}
