//! Resilience: bounded retry and degraded results.
//!
//! Every externally-facing call (agent analysis, debate turns, critique,
//! synthesis) goes through [`retry_with_backoff`]: rate-limit acquisition
//! before each attempt, exponential backoff between attempts, and retries
//! only for transient failure classes.
//!
//! ```text
//! attempt 0 ── acquire ── call ──┬─ Ok ─────────────────────────▶ done
//!                                ├─ Err(validation) ────────────▶ surfaced
//!                                └─ Err(transient) ─ backoff ─▶ attempt 1 …
//!                                                    (rate limited: penalize limiter)
//! ```

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::error::AgentError;
use crate::provider::ProviderError;
use crate::rate_limit::RateLimiter;

/// How much of a stage's output is backed by full-fidelity results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DegradationLevel {
    /// Every contributing call succeeded.
    Full,
    /// Some calls failed or a deterministic fallback stood in.
    Partial,
    /// Nothing usable was produced; the payload is best-effort.
    Unavailable,
}

impl std::fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Partial => write!(f, "partial"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// Failure classes that may be retried.
pub trait Retryable {
    /// Whether the failure is transient (timeout, connection, rate limit).
    fn is_transient(&self) -> bool;

    /// Upstream-suggested delay before the next attempt.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

impl Retryable for ProviderError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

impl Retryable for AgentError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connection(_) | Self::RateLimited { .. }
        )
    }

    fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }
}

/// Retry bound and backoff schedule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Backoff before the first retry; doubled for each further retry.
    pub base_backoff: Duration,
    /// Upper bound on a single backoff.
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_backoff: Duration) -> Self {
        Self {
            max_retries,
            base_backoff,
            max_backoff: Duration::from_secs(30),
        }
    }

    /// Backoff after failed attempt number `attempt` (0-indexed).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    /// Total attempts allowed.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

/// Run `op` until it succeeds, fails non-transiently, or the retry bound is
/// spent. Returns the final result and the number of attempts made.
///
/// When `limiter` is given, a permit is acquired before every attempt and
/// upstream `retry_after` hints push the limiter's next slot out.
pub async fn retry_with_backoff<T, E, F, Fut>(
    policy: &RetryPolicy,
    limiter: Option<&RateLimiter>,
    label: &str,
    mut op: F,
) -> (Result<T, E>, u32)
where
    E: Retryable + std::fmt::Display,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut attempt = 0;
    loop {
        if let Some(limiter) = limiter {
            limiter.acquire().await;
        }

        match op(attempt).await {
            Ok(value) => return (Ok(value), attempt + 1),
            Err(e) => {
                if !e.is_transient() || attempt >= policy.max_retries {
                    return (Err(e), attempt + 1);
                }

                if let (Some(limiter), Some(delay)) = (limiter, e.retry_after()) {
                    limiter.penalize(delay).await;
                }

                let backoff = policy.backoff_for(attempt);
                warn!(
                    call = label,
                    attempt = attempt + 1,
                    max_retries = policy.max_retries,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Transient error, retrying"
                );
                tokio::time::sleep(backoff).await;
                attempt += 1;
            }
        }
    }
}
