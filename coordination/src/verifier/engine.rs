//! Verification engine: checks numeric and factual claims against the
//! evidence index.
//!
//! A claim is verified when one retrieved document clears every gate:
//!
//! 1. similarity score ≥ `similarity_threshold`
//! 2. source priority ≥ `source_priority_threshold`
//! 3. for numeric claims, the document contains a number within
//!    `numeric_tolerance` of the claimed value
//!
//! Unverified claims are returned with a warning, never dropped.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::evidence::{Evidence, GuardedEvidence, LookupError};
use crate::cache::Cache;
use crate::config::VerificationConfig;
use crate::error::{WorkflowError, WorkflowResult};
use crate::state::types::{Claim, ClaimRef};
use crate::workflow::extract::{first_number, numbers, relative_difference};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub claim_ref: ClaimRef,
    pub claim_text: String,
    pub verified: bool,
    /// Similarity × source priority of the deciding document, 0 if none.
    pub confidence: f64,
    /// Sources of the documents that supported (or were closest to) the claim.
    pub evidence_refs: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

pub struct VerificationEngine {
    config: VerificationConfig,
    cache: Arc<dyn Cache>,
}

impl VerificationEngine {
    pub fn new(config: VerificationConfig, cache: Arc<dyn Cache>) -> Self {
        Self { config, cache }
    }

    /// Priority of `source`: the longest configured prefix match,
    /// case-insensitive, else the default.
    pub fn source_priority(&self, source: &str) -> f64 {
        let source = source.to_lowercase();
        self.config
            .source_priorities
            .iter()
            .filter(|(prefix, _)| source.starts_with(&prefix.to_lowercase()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, p)| *p)
            .unwrap_or(self.config.default_source_priority)
    }

    fn cache_key(&self, claim_text: &str) -> String {
        format!(
            "evidence:{}:{}",
            self.config.top_k,
            claim_text.trim().to_lowercase()
        )
    }

    async fn lookup(
        &self,
        claim_text: &str,
        index: &GuardedEvidence,
        cancel: &CancellationToken,
    ) -> Result<Vec<Evidence>, LookupError> {
        let key = self.cache_key(claim_text);
        if let Some(raw) = self.cache.get(&key).await {
            match serde_json::from_str::<Vec<Evidence>>(&raw) {
                Ok(hit) => {
                    debug!(key = %key, "Evidence cache hit");
                    return Ok(hit);
                }
                Err(e) => debug!(key = %key, error = %e, "Unreadable cache entry, refetching"),
            }
        }

        let found = index.search(claim_text, self.config.top_k, cancel).await?;
        match serde_json::to_string(&found) {
            Ok(raw) => self.cache.set(&key, raw, self.config.cache_ttl()).await,
            Err(e) => debug!(error = %e, "Evidence not cached"),
        }
        Ok(found)
    }

    fn judge(&self, claim_ref: ClaimRef, claim: &Claim, evidence: &[Evidence]) -> VerificationResult {
        let mut result = VerificationResult {
            claim_ref,
            claim_text: claim.text.clone(),
            verified: false,
            confidence: 0.0,
            evidence_refs: Vec::new(),
            warning: None,
        };

        let mut ranked: Vec<&Evidence> = evidence.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        let Some(best) = ranked.first() else {
            result.warning = Some("no evidence found".to_string());
            return result;
        };

        let claimed = claim.value.or_else(|| first_number(&claim.text));
        let similar: Vec<&Evidence> = ranked
            .iter()
            .copied()
            .filter(|e| e.score >= self.config.similarity_threshold)
            .collect();
        let trusted: Vec<&Evidence> = similar
            .iter()
            .copied()
            .filter(|e| self.source_priority(&e.source) >= self.config.source_priority_threshold)
            .collect();
        let supporting = trusted.iter().copied().find(|e| match claimed {
            Some(value) => numbers(&e.text)
                .into_iter()
                .any(|n| relative_difference(n, value) <= self.config.numeric_tolerance),
            None => true,
        });

        match supporting {
            Some(e) => {
                result.verified = true;
                result.confidence = (e.score * self.source_priority(&e.source)).clamp(0.0, 1.0);
                result.evidence_refs = vec![e.source.clone()];
            }
            None => {
                result.confidence = (best.score * self.source_priority(&best.source)).clamp(0.0, 1.0);
                result.evidence_refs = ranked.iter().map(|e| e.source.clone()).collect();
                result.warning = Some(
                    if similar.is_empty() {
                        "no sufficiently similar evidence"
                    } else if trusted.is_empty() {
                        "evidence only from low-priority sources"
                    } else {
                        "no matching figure in evidence"
                    }
                    .to_string(),
                );
            }
        }
        result
    }

    /// Verify every checkable claim; other claims are skipped. Fails only
    /// when `cancel` fires.
    pub async fn verify(
        &self,
        claims: &[(ClaimRef, Claim)],
        index: &GuardedEvidence,
        cancel: &CancellationToken,
    ) -> WorkflowResult<Vec<VerificationResult>> {
        let mut results = Vec::new();
        for (claim_ref, claim) in claims.iter().filter(|(_, c)| c.is_checkable()) {
            let result = match self.lookup(&claim.text, index, cancel).await {
                Ok(evidence) => self.judge(claim_ref.clone(), claim, &evidence),
                Err(LookupError::Cancelled) => return Err(WorkflowError::Cancelled),
                Err(LookupError::Search(e)) => {
                    warn!(claim = %claim_ref, error = %e, "Evidence search failed");
                    VerificationResult {
                        claim_ref: claim_ref.clone(),
                        claim_text: claim.text.clone(),
                        verified: false,
                        confidence: 0.0,
                        evidence_refs: Vec::new(),
                        warning: Some(format!("evidence search failed: {e}")),
                    }
                }
            };
            results.push(result);
        }
        info!(
            checked = results.len(),
            verified = results.iter().filter(|r| r.verified).count(),
            "Verification complete"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{InMemoryCache, NoCache};
    use crate::rate_limit::RateLimiterSet;
    use crate::verifier::{EvidenceError, EvidenceIndex};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct Fixed {
        docs: Vec<Evidence>,
        calls: AtomicU32,
    }

    impl Fixed {
        fn new(docs: Vec<(&str, &str, f64)>) -> Self {
            Self {
                docs: docs
                    .into_iter()
                    .map(|(text, source, score)| Evidence {
                        text: text.into(),
                        source: source.into(),
                        score,
                    })
                    .collect(),
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait]
    impl EvidenceIndex for Fixed {
        async fn search(&self, _t: &str, k: usize) -> Result<Vec<Evidence>, EvidenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.docs.iter().take(k).cloned().collect())
        }
    }

    struct Broken;

    #[async_trait]
    impl EvidenceIndex for Broken {
        async fn search(&self, _t: &str, _k: usize) -> Result<Vec<Evidence>, EvidenceError> {
            Err(EvidenceError::Unavailable("index offline".into()))
        }
    }

    fn claim(text: &str) -> (ClaimRef, Claim) {
        (
            ClaimRef {
                agent_name: "labor".into(),
                claim_index: 0,
            },
            Claim::new(text),
        )
    }

    struct Stalled;

    #[async_trait]
    impl EvidenceIndex for Stalled {
        async fn search(&self, _t: &str, _k: usize) -> Result<Vec<Evidence>, EvidenceError> {
            std::future::pending().await
        }
    }

    fn engine(cache: Arc<dyn Cache>) -> VerificationEngine {
        VerificationEngine::new(VerificationConfig::default(), cache)
    }

    fn guarded(index: Arc<dyn EvidenceIndex>) -> GuardedEvidence {
        GuardedEvidence::new(index, &RateLimiterSet::new(0.0), Duration::from_secs(5))
    }

    async fn run(
        e: &VerificationEngine,
        claims: &[(ClaimRef, Claim)],
        index: Arc<dyn EvidenceIndex>,
    ) -> Vec<VerificationResult> {
        e.verify(claims, &guarded(index), &CancellationToken::new())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_matching_figure_from_trusted_source_verifies() {
        let index = Arc::new(Fixed::new(vec![("Unemployment rate was 4.1 percent in March", "bls:LNS14000000", 0.9)]));
        let out = run(&engine(Arc::new(NoCache)), &[claim("Unemployment is 4.1%")], index).await;
        assert_eq!(out.len(), 1);
        assert!(out[0].verified);
        assert!((out[0].confidence - 0.9).abs() < 1e-9);
        assert_eq!(out[0].evidence_refs, vec!["bls:LNS14000000"]);
        assert!(out[0].warning.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_figure_is_flagged() {
        let index = Arc::new(Fixed::new(vec![("Unemployment rate was 4.1 percent", "bls", 0.9)]));
        let out = run(&engine(Arc::new(NoCache)), &[claim("Unemployment is 3.2%")], index).await;
        assert!(!out[0].verified);
        assert_eq!(out[0].warning.as_deref(), Some("no matching figure in evidence"));
    }

    #[tokio::test]
    async fn test_low_priority_source_not_enough() {
        let index = Arc::new(Fixed::new(vec![("Unemployment hit 4.1%", "news:wire", 0.95)]));
        let out = run(&engine(Arc::new(NoCache)), &[claim("Unemployment is 4.1%")], index).await;
        assert!(!out[0].verified);
        assert_eq!(
            out[0].warning.as_deref(),
            Some("evidence only from low-priority sources")
        );
    }

    #[tokio::test]
    async fn test_uncheckable_claims_skipped() {
        let index = Arc::new(Fixed::new(vec![]));
        let out = run(&engine(Arc::new(NoCache)), &[claim("Hiring momentum is uncertain")], index.clone()).await;
        assert!(out.is_empty());
        assert_eq!(index.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_search_failure_marks_unverified() {
        let out = run(&engine(Arc::new(NoCache)), &[claim("Unemployment is 4.1%")], Arc::new(Broken)).await;
        assert_eq!(out.len(), 1);
        assert!(!out[0].verified);
        assert!(out[0].warning.as_deref().unwrap().contains("index offline"));
    }

    #[tokio::test]
    async fn test_cache_prevents_second_search() {
        let index = Arc::new(Fixed::new(vec![("Unemployment rate was 4.1 percent", "bls", 0.9)]));
        let e = engine(Arc::new(InMemoryCache::new()));
        run(&e, &[claim("Unemployment is 4.1%")], index.clone()).await;
        let again = run(&e, &[claim("Unemployment is 4.1%")], index.clone()).await;
        assert!(again[0].verified);
        assert_eq!(index.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_index_times_out_as_unverified() {
        let out = run(&engine(Arc::new(NoCache)), &[claim("Unemployment is 4.1%")], Arc::new(Stalled)).await;
        assert_eq!(out.len(), 1);
        assert!(!out[0].verified);
        assert!(out[0].warning.as_deref().unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_search_stops_verification() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.cancel();
        });
        let err = engine(Arc::new(NoCache))
            .verify(&[claim("Unemployment is 4.1%")], &guarded(Arc::new(Stalled)), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::Cancelled));
    }

    #[test]
    fn test_source_priority_prefix() {
        let e = engine(Arc::new(NoCache));
        assert_eq!(e.source_priority("FRED:UNRATE"), 0.95);
        assert_eq!(e.source_priority("bls"), 1.0);
        assert_eq!(e.source_priority("blog"), 0.5);
    }
}
