//! Per-resource rate limiting for outbound calls.
//!
//! Each resource key (an agent's data dependency, the completion provider)
//! gets its own [`RateLimiter`]: a capacity-1 token bucket that spaces calls
//! at least `1 / calls_per_second` apart. `acquire` never fails, it only
//! delays. Waiters queue on a tokio mutex, which hands the lock out in FIFO
//! order, so no caller starves.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Token-bucket limiter for a single resource.
#[derive(Debug)]
pub struct RateLimiter {
    resource: String,
    min_interval: Duration,
    /// Earliest instant at which the next call may be issued.
    next_slot: tokio::sync::Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter allowing `calls_per_second` calls. Non-positive or
    /// non-finite rates disable limiting.
    pub fn new(resource: &str, calls_per_second: f64) -> Self {
        let min_interval = if calls_per_second.is_finite() && calls_per_second > 0.0 {
            Duration::from_secs_f64(1.0 / calls_per_second)
        } else {
            Duration::ZERO
        };
        Self {
            resource: resource.to_string(),
            min_interval,
            next_slot: tokio::sync::Mutex::new(None),
        }
    }

    /// Resource key this limiter guards.
    pub fn resource(&self) -> &str {
        &self.resource
    }

    /// Minimum spacing between two calls.
    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until a call may be issued, then claim the slot.
    ///
    /// The lock is held across the sleep so later callers queue behind the
    /// current one in arrival order.
    pub async fn acquire(&self) {
        let mut next_slot = self.next_slot.lock().await;
        if let Some(ready_at) = *next_slot {
            let now = Instant::now();
            if ready_at > now {
                debug!(
                    resource = %self.resource,
                    wait_ms = (ready_at - now).as_millis() as u64,
                    "Rate limit delay"
                );
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *next_slot = Some(Instant::now() + self.min_interval);
    }

    /// Push the next permitted call out by at least `delay` from now.
    ///
    /// Used when the upstream itself reports rate limiting, so the rejection
    /// turns into delay for every caller of this resource.
    pub async fn penalize(&self, delay: Duration) {
        let mut next_slot = self.next_slot.lock().await;
        let candidate = Instant::now() + delay;
        *next_slot = Some(match *next_slot {
            Some(current) if current > candidate => current,
            _ => candidate,
        });
        debug!(resource = %self.resource, delay_ms = delay.as_millis() as u64, "Rate limiter penalized");
    }
}

/// Lazily-populated map of independent limiters keyed by resource.
#[derive(Debug)]
pub struct RateLimiterSet {
    default_calls_per_second: f64,
    overrides: HashMap<String, f64>,
    limiters: Mutex<HashMap<String, Arc<RateLimiter>>>,
}

impl RateLimiterSet {
    /// Create a set whose limiters default to `default_calls_per_second`.
    pub fn new(default_calls_per_second: f64) -> Self {
        Self {
            default_calls_per_second,
            overrides: HashMap::new(),
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Create a set with per-resource rate overrides.
    pub fn with_overrides(default_calls_per_second: f64, overrides: HashMap<String, f64>) -> Self {
        Self {
            default_calls_per_second,
            overrides,
            limiters: Mutex::new(HashMap::new()),
        }
    }

    /// Configured rate for `resource`.
    pub fn rate_for(&self, resource: &str) -> f64 {
        self.overrides
            .get(resource)
            .copied()
            .unwrap_or(self.default_calls_per_second)
    }

    /// The limiter for `resource`, created on first use.
    pub fn limiter(&self, resource: &str) -> Arc<RateLimiter> {
        let mut limiters = self
            .limiters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        limiters
            .entry(resource.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::new(resource, self.rate_for(resource))))
            .clone()
    }

    /// Acquire a permit on `resource`.
    pub async fn acquire(&self, resource: &str) {
        self.limiter(resource).acquire().await;
    }
}
