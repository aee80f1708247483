//! Synthesize stage: the final answer.
//!
//! The provider writes the answer from everything the run gathered. If that
//! call fails, a deterministic summary of the same material stands in and
//! the result is marked degraded. Disputed topics are always surfaced as
//! unresolved, never silently picked.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::SynthesisConfig;
use crate::critique::Severity;
use crate::debate::ResolutionStatus;
use crate::provider::GuardedProvider;
use crate::resilience::DegradationLevel;
use crate::state::types::{Finding, Route, TaskStatus};
use crate::state::workflow::WorkflowState;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Synthesis {
    pub answer: String,
    pub route: Route,
    pub warnings: Vec<String>,
    /// Topics whose debate ended `flagged`.
    pub flagged_topics: Vec<String>,
    pub degraded: DegradationLevel,
}

pub struct Synthesizer {
    provider: GuardedProvider,
    config: SynthesisConfig,
}

impl Synthesizer {
    pub fn new(provider: GuardedProvider, config: SynthesisConfig) -> Self {
        Self { provider, config }
    }

    pub async fn synthesize(&self, state: &WorkflowState, cancel: &CancellationToken) -> Synthesis {
        let route = state.classification().map(|c| c.route).unwrap_or(Route::Fast);
        let findings = ranked_findings(state.final_findings());
        let warnings = collect_warnings(state);
        let flagged_topics: Vec<String> = state
            .resolutions()
            .iter()
            .filter(|r| r.status == ResolutionStatus::Flagged)
            .map(|r| r.contradiction.topic.clone())
            .collect();
        let agents_failed = state.tasks().iter().any(|t| t.status != TaskStatus::Complete);

        let prompt = self.prompt(state, &findings, &flagged_topics);
        let (answer, mut degraded) = match self
            .provider
            .complete("synthesize", &prompt, &[], cancel)
            .await
        {
            Ok(answer) if !answer.trim().is_empty() => (answer.trim().to_string(), DegradationLevel::Full),
            Ok(_) => {
                warn!(query_id = %state.query.id, "Empty synthesis, using fallback");
                self.fallback(state, &findings, &flagged_topics)
            }
            Err(e) => {
                warn!(query_id = %state.query.id, error = %e, "Synthesis call failed, using fallback");
                self.fallback(state, &findings, &flagged_topics)
            }
        };
        if agents_failed {
            degraded = degraded.max(DegradationLevel::Partial);
        }

        info!(
            query_id = %state.query.id,
            route = %route,
            degraded = %degraded,
            warnings = warnings.len(),
            flagged = flagged_topics.len(),
            "Synthesis complete"
        );
        Synthesis {
            answer,
            route,
            warnings,
            flagged_topics,
            degraded,
        }
    }

    fn prompt(&self, state: &WorkflowState, findings: &[Finding], flagged: &[String]) -> String {
        let mut p = format!("Original question: {}\n\n", state.query.text);

        if let Some(ctx) = state.context() {
            if !ctx.facts.is_empty() {
                p.push_str("Evidence:\n");
                for fact in &ctx.facts {
                    let _ = writeln!(p, "- [{}] {}", fact.source, fact.text);
                }
                p.push('\n');
            }
        }

        if !findings.is_empty() {
            p.push_str("Analyst findings:\n");
            for f in findings {
                for c in &f.claims {
                    let _ = writeln!(p, "- {} (confidence {:.2}): {}", f.agent_name, f.confidence, c.text);
                }
            }
            p.push('\n');
        }

        let resolved: Vec<_> = state.resolutions().iter().filter(|r| r.is_resolved()).collect();
        if !resolved.is_empty() {
            p.push_str("Resolved disagreements:\n");
            for r in resolved {
                let _ = writeln!(p, "- {}: {}", r.contradiction.topic, r.resolution_text);
            }
            p.push('\n');
        }

        if !flagged.is_empty() {
            let _ = writeln!(
                p,
                "Unresolved disagreements (present both sides, do not pick one): {}\n",
                flagged.join(", ")
            );
        }

        let unverified: Vec<_> = state.verification().iter().filter(|v| !v.verified).collect();
        if !unverified.is_empty() {
            p.push_str("Claims that could not be verified (mark them as such):\n");
            for v in unverified {
                let _ = writeln!(p, "- {}", v.claim_text);
            }
            p.push('\n');
        }

        p.push_str("Write a concise, direct answer to the original question.");
        p
    }

    fn fallback(
        &self,
        state: &WorkflowState,
        findings: &[Finding],
        flagged: &[String],
    ) -> (String, DegradationLevel) {
        let mut answer = format!("Summary for \"{}\":\n", state.query.text);
        let mut listed = 0;

        for f in findings {
            for c in &f.claims {
                if listed >= self.config.max_fallback_claims {
                    break;
                }
                let _ = writeln!(answer, "- {} ({:.2}): {}", f.agent_name, f.confidence, c.text);
                listed += 1;
            }
        }
        if listed == 0 {
            if let Some(ctx) = state.context() {
                for fact in ctx.facts.iter().take(self.config.max_fallback_claims) {
                    let _ = writeln!(answer, "- [{}] {}", fact.source, fact.text);
                    listed += 1;
                }
            }
        }
        for r in state.resolutions().iter().filter(|r| r.is_resolved()) {
            let _ = writeln!(answer, "Resolved ({}): {}", r.contradiction.topic, r.resolution_text);
        }
        for topic in flagged {
            let _ = writeln!(answer, "Unresolved: {topic}");
        }

        if listed == 0 {
            answer.push_str("No findings or evidence were available.");
            (answer, DegradationLevel::Unavailable)
        } else {
            (answer.trim_end().to_string(), DegradationLevel::Partial)
        }
    }
}

fn ranked_findings(mut findings: Vec<Finding>) -> Vec<Finding> {
    findings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    findings
}

fn collect_warnings(state: &WorkflowState) -> Vec<String> {
    let mut warnings = Vec::new();
    for task in state.tasks().iter().filter(|t| t.status != TaskStatus::Complete) {
        let detail = task
            .failure
            .as_ref()
            .map(|f| format!("{}: {}", f.kind, f.message))
            .unwrap_or_else(|| task.status.to_string());
        warnings.push(format!("agent {} did not complete ({detail})", task.agent_name));
    }
    for r in state.resolutions() {
        if r.status == ResolutionStatus::Flagged {
            let mut w = format!("disagreement on {} is unresolved", r.contradiction.topic);
            if let Some(note) = &r.note {
                let _ = write!(w, " ({note})");
            }
            warnings.push(w);
        }
    }
    for c in state.critiques().iter().filter(|c| c.severity == Severity::High) {
        warnings.push(format!("high-severity critique of {}: {}", c.target, c.challenge_text));
    }
    for v in state.verification().iter().filter(|v| !v.verified) {
        let why = v.warning.as_deref().unwrap_or("unverified");
        warnings.push(format!("claim {} unverified: {why}", v.claim_ref));
    }
    warnings
}
