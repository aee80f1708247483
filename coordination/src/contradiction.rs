//! Contradiction detection across agent findings.
//!
//! Claims from different agents are grouped by topic: an explicit
//! `Claim::topic` when given, otherwise the overlap of their content tokens.
//! Within a topic two claims conflict when
//!
//! - they refer to the same period (or either names none), and
//! - their values differ by more than the relative tolerance, or one
//!   describes a rise while the other describes a fall.
//!
//! Each topic with at least one conflict yields one [`Contradiction`],
//! listing one position per participating agent.

use std::collections::BTreeSet;
use tracing::debug;

use crate::config::ContradictionConfig;
use crate::state::types::{Claim, Contradiction, Finding, OpposingClaim};
use crate::workflow::extract::{
    content_tokens, first_number, periods, relative_difference, DOWN_WORDS, UP_WORDS,
};

/// Token overlap (Jaccard) at which two untopiced claims share a topic.
const TOPIC_OVERLAP: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

struct Candidate<'a> {
    agent_name: &'a str,
    claim: &'a Claim,
    confidence: f64,
    explicit_topic: Option<String>,
    tokens: BTreeSet<String>,
    label: String,
    value: Option<f64>,
    direction: Option<Direction>,
    periods: BTreeSet<String>,
}

impl<'a> Candidate<'a> {
    fn new(finding: &'a Finding, claim: &'a Claim) -> Self {
        let ordered = content_tokens(&claim.text);
        let explicit_topic = claim
            .topic
            .as_deref()
            .map(|t| t.trim().to_lowercase())
            .filter(|t| !t.is_empty());
        let label = explicit_topic
            .clone()
            .unwrap_or_else(|| ordered.join(" "));
        Self {
            agent_name: &finding.agent_name,
            claim,
            confidence: finding.confidence,
            explicit_topic,
            tokens: ordered.into_iter().collect(),
            label,
            value: claim.value.or_else(|| first_number(&claim.text)),
            direction: direction_of(&claim.text),
            periods: periods(&claim.text),
        }
    }

    fn same_topic(&self, other: &Candidate<'_>) -> bool {
        match (&self.explicit_topic, &other.explicit_topic) {
            (Some(a), Some(b)) => a == b,
            _ => jaccard(&self.tokens, &other.tokens) >= TOPIC_OVERLAP,
        }
    }

    fn same_period(&self, other: &Candidate<'_>) -> bool {
        self.periods.is_empty()
            || other.periods.is_empty()
            || !self.periods.is_disjoint(&other.periods)
    }

    fn conflicts_with(&self, other: &Candidate<'_>, tolerance: f64) -> bool {
        if self.agent_name == other.agent_name || !self.same_period(other) {
            return false;
        }
        let numeric = match (self.value, other.value) {
            (Some(a), Some(b)) => relative_difference(a, b) > tolerance,
            _ => false,
        };
        let directional = matches!(
            (self.direction, other.direction),
            (Some(Direction::Up), Some(Direction::Down))
                | (Some(Direction::Down), Some(Direction::Up))
        );
        numeric || directional
    }
}

fn jaccard(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let inter = a.intersection(b).count() as f64;
    let union = a.union(b).count() as f64;
    inter / union
}

fn direction_of(text: &str) -> Option<Direction> {
    let lower = text.to_lowercase();
    let words: Vec<&str> = lower
        .split(|c: char| !c.is_ascii_alphabetic())
        .filter(|w| !w.is_empty())
        .collect();
    let up = words.iter().any(|w| UP_WORDS.contains(w));
    let down = words.iter().any(|w| DOWN_WORDS.contains(w));
    match (up, down) {
        (true, false) => Some(Direction::Up),
        (false, true) => Some(Direction::Down),
        _ => None,
    }
}

/// Finds conflicting claims between agents.
pub struct ContradictionDetector {
    config: ContradictionConfig,
}

impl ContradictionDetector {
    pub fn new(config: ContradictionConfig) -> Self {
        Self { config }
    }

    /// Contradictions among `findings`, in order of first appearance.
    pub fn detect(&self, findings: &[Finding]) -> Vec<Contradiction> {
        let candidates: Vec<Candidate<'_>> = findings
            .iter()
            .flat_map(|f| f.claims.iter().map(move |c| Candidate::new(f, c)))
            .collect();

        // Cluster by topic against each cluster's first member.
        let mut clusters: Vec<Vec<usize>> = Vec::new();
        for (i, cand) in candidates.iter().enumerate() {
            match clusters
                .iter_mut()
                .find(|members| candidates[members[0]].same_topic(cand))
            {
                Some(members) => members.push(i),
                None => clusters.push(vec![i]),
            }
        }

        let mut contradictions = Vec::new();
        for members in clusters {
            let mut involved: Vec<usize> = Vec::new();
            for (pos, &i) in members.iter().enumerate() {
                for &j in &members[pos + 1..] {
                    if candidates[i].conflicts_with(&candidates[j], self.config.numeric_tolerance) {
                        for k in [i, j] {
                            if !involved.contains(&k) {
                                involved.push(k);
                            }
                        }
                    }
                }
            }
            if involved.is_empty() {
                continue;
            }
            involved.sort_unstable();

            let mut agents_seen = BTreeSet::new();
            let opposing: Vec<OpposingClaim> = involved
                .iter()
                .map(|&k| &candidates[k])
                .filter(|c| agents_seen.insert(c.agent_name))
                .map(|c| OpposingClaim {
                    agent_name: c.agent_name.to_string(),
                    claim: c.claim.clone(),
                    confidence: c.confidence,
                })
                .collect();
            let topic = candidates[members[0]].label.clone();
            debug!(topic = %topic, positions = opposing.len(), "Contradiction detected");
            contradictions.push(Contradiction { topic, opposing });
        }
        contradictions
    }
}

impl Default for ContradictionDetector {
    fn default() -> Self {
        Self::new(ContradictionConfig::default())
    }
}
