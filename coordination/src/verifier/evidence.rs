//! Evidence index seam.
//!
//! The engine never calls an [`EvidenceIndex`] directly: every search goes
//! through [`GuardedEvidence`], which takes a rate-limit slot, bounds the
//! call with a timeout and stops as soon as the run is cancelled.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::rate_limit::{RateLimiter, RateLimiterSet};

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EvidenceError {
    #[error("evidence index unavailable: {0}")]
    Unavailable(String),

    #[error("evidence query failed: {0}")]
    Query(String),

    #[error("evidence search timed out after {0}s")]
    Timeout(u64),
}

/// One retrieved piece of evidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Evidence {
    pub text: String,
    /// Source name, e.g. `bls` or `fred:UNRATE`.
    pub source: String,
    /// Similarity to the query in [0, 1].
    pub score: f64,
}

/// Similarity search over retrieved documents.
#[async_trait]
pub trait EvidenceIndex: Send + Sync {
    async fn search(&self, claim_text: &str, top_k: usize) -> Result<Vec<Evidence>, EvidenceError>;

    /// Resource key searches are rate limited under.
    fn resource(&self) -> &str {
        "evidence"
    }
}

/// Index with no documents.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoEvidence;

#[async_trait]
impl EvidenceIndex for NoEvidence {
    async fn search(&self, _claim_text: &str, _top_k: usize) -> Result<Vec<Evidence>, EvidenceError> {
        Ok(Vec::new())
    }
}

/// Why a guarded search produced no evidence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LookupError {
    #[error(transparent)]
    Search(#[from] EvidenceError),

    #[error("evidence lookup cancelled")]
    Cancelled,
}

/// An [`EvidenceIndex`] behind its rate limiter, a per-search timeout and
/// the run's cancellation token.
#[derive(Clone)]
pub struct GuardedEvidence {
    index: Arc<dyn EvidenceIndex>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
}

impl GuardedEvidence {
    pub fn new(index: Arc<dyn EvidenceIndex>, limiters: &RateLimiterSet, timeout: Duration) -> Self {
        let limiter = limiters.limiter(index.resource());
        Self {
            index,
            limiter,
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn search(
        &self,
        claim_text: &str,
        top_k: usize,
        cancel: &CancellationToken,
    ) -> Result<Vec<Evidence>, LookupError> {
        let call = async {
            self.limiter.acquire().await;
            match tokio::time::timeout(self.timeout, self.index.search(claim_text, top_k)).await {
                Ok(found) => found.map_err(LookupError::from),
                Err(_) => Err(EvidenceError::Timeout(self.timeout.as_secs()).into()),
            }
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(LookupError::Cancelled),
            found = call => found,
        }
    }
}

impl std::fmt::Debug for GuardedEvidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedEvidence")
            .field("resource", &self.limiter.resource())
            .field("timeout", &self.timeout)
            .finish()
    }
}
