//! Critique: one adversarial review pass over confident claims and
//! resolved debates.
//!
//! Each target gets a single prompt asking what would falsify it. The reply
//! is expected to carry `SEVERITY:`, `ADJUSTMENT:` and `RESOLUTION:` lines;
//! missing lines fall back to per-severity defaults from [`CritiqueConfig`].

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::CritiqueConfig;
use crate::debate::DebateResolution;
use crate::provider::{CallError, GuardedProvider};
use crate::state::types::{ClaimRef, Finding, Query};

static SEVERITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*severity\W*(low|medium|high)\b").expect("SEVERITY_RE regex should compile")
});

static ADJUSTMENT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*adjustment[^\d\-+]*([+\-]?\d+(?:\.\d+)?)")
        .expect("ADJUSTMENT_RE regex should compile")
});

static RESOLUTION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\W*resolution\W*:\s*(.+?)\s*$").expect("RESOLUTION_RE regex should compile")
});

static TAGGED_LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\W*(severity|adjustment|resolution)\b").expect("TAGGED_LINE_RE regex should compile")
});

/// How damaging a critique is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
        }
    }
}

/// What a critique challenges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type", content = "ref")]
pub enum CritiqueTarget {
    Claim(ClaimRef),
    /// A resolved debate, by topic.
    Resolution(String),
}

impl std::fmt::Display for CritiqueTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Claim(r) => write!(f, "claim {r}"),
            Self::Resolution(topic) => write!(f, "resolution of {topic}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critique {
    pub target: CritiqueTarget,
    pub challenge_text: String,
    pub severity: Severity,
    /// Proposed way to settle the challenge.
    pub resolution: String,
    /// Added to the target's confidence; usually negative.
    pub confidence_adjustment: f64,
}

/// Parse a critique reply for `target`.
pub fn parse_critique(target: CritiqueTarget, reply: &str, config: &CritiqueConfig) -> Critique {
    let severity = SEVERITY_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| match m.as_str().to_lowercase().as_str() {
            "low" => Severity::Low,
            "high" => Severity::High,
            _ => Severity::Medium,
        })
        .unwrap_or(Severity::Medium);

    let default_adjustment = match severity {
        Severity::Low => config.low_adjustment,
        Severity::Medium => config.medium_adjustment,
        Severity::High => config.high_adjustment,
    };
    let confidence_adjustment = ADJUSTMENT_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .map(|v| v.clamp(-1.0, 1.0))
        .unwrap_or(default_adjustment);

    let resolution = RESOLUTION_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| "none proposed".to_string());

    let body: Vec<&str> = reply
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !TAGGED_LINE_RE.is_match(l))
        .collect();
    let challenge_text = if body.is_empty() {
        reply.trim().to_string()
    } else {
        body.join(" ")
    };

    Critique {
        target,
        challenge_text,
        severity,
        resolution,
        confidence_adjustment,
    }
}

fn prompt(query: &Query, subject: &str, statement: &str) -> String {
    format!(
        "Original question: {}\n{subject}: {statement}\n\n\
         Act as an adversarial reviewer. What evidence or condition would falsify this?\n\
         Answer in this format:\n\
         SEVERITY: low | medium | high\n\
         ADJUSTMENT: a confidence change between -1.0 and 0.0\n\
         RESOLUTION: how the challenge could be settled\n\
         followed by your challenge in one or two sentences.",
        query.text
    )
}

/// Single-pass adversarial reviewer.
pub struct CritiqueEngine {
    provider: GuardedProvider,
    config: CritiqueConfig,
}

impl CritiqueEngine {
    pub fn new(provider: GuardedProvider, config: CritiqueConfig) -> Self {
        Self { provider, config }
    }

    /// Targets in review order: confident claims first, capped at
    /// `max_claims`, then every resolved debate.
    fn targets(
        &self,
        findings: &[Finding],
        resolutions: &[DebateResolution],
    ) -> Vec<(CritiqueTarget, String, String)> {
        let claims = findings
            .iter()
            .filter(|f| f.confidence >= self.config.min_confidence)
            .flat_map(|f| {
                f.claims.iter().enumerate().map(move |(i, c)| {
                    (
                        CritiqueTarget::Claim(ClaimRef {
                            agent_name: f.agent_name.clone(),
                            claim_index: i,
                        }),
                        format!("Claim by {}", f.agent_name),
                        c.text.clone(),
                    )
                })
            })
            .take(self.config.max_claims);

        let resolved = resolutions.iter().filter(|r| r.is_resolved()).map(|r| {
            (
                CritiqueTarget::Resolution(r.contradiction.topic.clone()),
                format!("Debate resolution on {}", r.contradiction.topic),
                r.resolution_text.clone(),
            )
        });

        claims.chain(resolved).collect()
    }

    /// Critique confident claims and resolved debates. Failed calls skip
    /// their target; cancellation stops the pass with what was gathered.
    pub async fn critique(
        &self,
        query: &Query,
        findings: &[Finding],
        resolutions: &[DebateResolution],
        cancel: &CancellationToken,
    ) -> Vec<Critique> {
        let targets = self.targets(findings, resolutions);
        if targets.is_empty() {
            return Vec::new();
        }

        let mut critiques = Vec::with_capacity(targets.len());
        for (target, subject, statement) in targets {
            let label = format!("critique:{target}");
            match self
                .provider
                .complete(&label, &prompt(query, &subject, &statement), &[], cancel)
                .await
            {
                Ok(reply) => {
                    let critique = parse_critique(target, &reply, &self.config);
                    debug!(
                        target = %critique.target,
                        severity = %critique.severity,
                        adjustment = critique.confidence_adjustment,
                        "Critique recorded"
                    );
                    critiques.push(critique);
                }
                Err(CallError::Cancelled) => {
                    warn!(gathered = critiques.len(), "Critique pass cancelled");
                    break;
                }
                Err(e) => {
                    warn!(target = %target, error = %e, "Critique call failed, skipping target");
                }
            }
        }
        info!(critiques = critiques.len(), "Critique pass complete");
        critiques
    }
}

/// Findings with claim critiques folded into their confidence, clamped to
/// [0, 1]. Resolution critiques leave findings untouched.
pub fn apply_adjustments(findings: &[Finding], critiques: &[Critique]) -> Vec<Finding> {
    findings
        .iter()
        .map(|f| {
            let delta: f64 = critiques
                .iter()
                .filter_map(|c| match &c.target {
                    CritiqueTarget::Claim(r) if r.agent_name == f.agent_name => {
                        Some(c.confidence_adjustment)
                    }
                    _ => None,
                })
                .sum();
            Finding {
                confidence: (f.confidence + delta).clamp(0.0, 1.0),
                ..f.clone()
            }
        })
        .collect()
}
