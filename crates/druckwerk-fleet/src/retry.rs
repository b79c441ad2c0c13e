// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Retry engine with exponential backoff + jitter for flaky device links.
//
// Only transport-level errors (device IO, timeouts) are retried. State
// machine violations, busy printers, and container errors surface
// immediately because retrying them cannot change the outcome.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use druckwerk_core::config::OrchestratorConfig;
use druckwerk_core::error::{DruckwerkError, Result};

/// Retry configuration, usually derived from [`OrchestratorConfig`].
pub struct RetryConfig {
    /// Maximum number of retry attempts after the first try.
    pub max_retries: u32,
    /// Base delay between retries (exponential backoff).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    pub fn from_orchestrator(config: &OrchestratorConfig) -> Self {
        Self {
            max_retries: config.max_device_retries,
            base_delay: Duration::from_millis(config.retry_base_delay_ms),
            max_delay: Duration::from_millis(config.retry_max_delay_ms),
        }
    }
}

/// Result of evaluating whether to retry.
#[derive(Debug)]
pub enum RetryDecision {
    /// Retry after this delay.
    RetryAfter(Duration),
    /// Do not retry, the error is not transport-level.
    GiveUp,
    /// Maximum retries exhausted.
    Exhausted,
}

/// Decide whether to retry based on the error and attempt count.
pub fn should_retry(err: &DruckwerkError, attempt: u32, config: &RetryConfig) -> RetryDecision {
    if !err.is_transient() {
        debug!(error = %err, "non-transient error, not retrying");
        return RetryDecision::GiveUp;
    }
    if attempt >= config.max_retries {
        warn!(attempt, max = config.max_retries, "retry limit exhausted");
        return RetryDecision::Exhausted;
    }
    let delay = compute_delay(attempt, config);
    debug!(attempt, delay_ms = delay.as_millis(), "scheduling retry");
    RetryDecision::RetryAfter(delay)
}

/// Run an async operation under the retry policy.
///
/// Non-transient errors and exhaustion both return the last error.
pub async fn retry_with<T, F, Fut>(config: &RetryConfig, label: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => match should_retry(&err, attempt, config) {
                RetryDecision::RetryAfter(delay) => {
                    warn!(label, attempt, error = %err, "operation failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                RetryDecision::GiveUp | RetryDecision::Exhausted => return Err(err),
            },
        }
    }
}

/// Compute exponential backoff delay with jitter.
///
/// delay = min(base * 2^attempt + jitter, max_delay)
fn compute_delay(attempt: u32, config: &RetryConfig) -> Duration {
    let base_ms = config.base_delay.as_millis() as u64;
    let exp_ms = base_ms.saturating_mul(1u64 << attempt.min(10));
    let total_ms = exp_ms.saturating_add(jitter(base_ms, attempt));
    Duration::from_millis(total_ms.min(config.max_delay.as_millis() as u64))
}

/// Deterministic jitter spread across [0, base) from the attempt number.
/// Keeps concurrent retriers from synchronizing without a rand dependency.
fn jitter(base_ms: u64, attempt: u32) -> u64 {
    let hash = (attempt as u64).wrapping_mul(6364136223846793005);
    hash % base_ms.max(1)
}
