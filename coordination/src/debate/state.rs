//! Debate state machine: phases, turn budget, transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::ChatMessage;
use crate::state::types::Contradiction;

/// Phase of a debate over one contradiction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebatePhase {
    /// Each participant states its position once.
    Opening,
    /// Participants critique each other's claims.
    Challenge,
    /// Stress-test assumptions.
    EdgeCase,
    /// Quantify downside risk.
    Risk,
    /// Moderator proposal and participant votes.
    Consensus,
    /// Moderator writes the resolution text.
    Synthesis,
    /// Debate over.
    Terminal,
}

impl DebatePhase {
    pub fn is_terminal(self) -> bool {
        self == Self::Terminal
    }

    /// Phases run in order; any phase may end the debate early.
    pub fn valid_transitions(self) -> &'static [DebatePhase] {
        match self {
            Self::Opening => &[Self::Challenge, Self::Terminal],
            Self::Challenge => &[Self::EdgeCase, Self::Terminal],
            Self::EdgeCase => &[Self::Risk, Self::Terminal],
            Self::Risk => &[Self::Consensus, Self::Terminal],
            Self::Consensus => &[Self::Synthesis, Self::Terminal],
            Self::Synthesis => &[Self::Terminal],
            Self::Terminal => &[],
        }
    }
}

impl std::fmt::Display for DebatePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Opening => write!(f, "opening"),
            Self::Challenge => write!(f, "challenge"),
            Self::EdgeCase => write!(f, "edge_case"),
            Self::Risk => write!(f, "risk"),
            Self::Consensus => write!(f, "consensus"),
            Self::Synthesis => write!(f, "synthesis"),
            Self::Terminal => write!(f, "terminal"),
        }
    }
}

/// Turns allotted to each phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PhaseBudget {
    pub opening: u32,
    pub challenge: u32,
    pub edge_case: u32,
    pub risk: u32,
    /// Moderator proposal plus one vote per participant, or zero.
    pub consensus: u32,
    pub synthesis: u32,
}

impl PhaseBudget {
    /// Split `total` turns among the phases for `participants` speakers.
    ///
    /// Synthesis is reserved first, then one opening per participant, then
    /// a full consensus round; what is left goes half to challenge and a
    /// quarter each to edge case and risk. A budget too small for a
    /// consensus round gets none, which can only end `flagged`.
    pub fn allocate(total: u32, participants: u32) -> Self {
        fn take(left: &mut u32, want: u32) -> u32 {
            let got = want.min(*left);
            *left -= got;
            got
        }

        let mut left = total;
        let synthesis = take(&mut left, 1);
        let opening = take(&mut left, participants);
        let consensus_round = participants + 1;
        let consensus = if left >= consensus_round {
            take(&mut left, consensus_round)
        } else {
            0
        };
        let rest = left;
        let edge_case = rest / 4;
        let risk = rest / 4;
        let challenge = rest - edge_case - risk;

        Self {
            opening,
            challenge,
            edge_case,
            risk,
            consensus,
            synthesis,
        }
    }

    pub fn for_phase(&self, phase: DebatePhase) -> u32 {
        match phase {
            DebatePhase::Opening => self.opening,
            DebatePhase::Challenge => self.challenge,
            DebatePhase::EdgeCase => self.edge_case,
            DebatePhase::Risk => self.risk,
            DebatePhase::Consensus => self.consensus,
            DebatePhase::Synthesis => self.synthesis,
            DebatePhase::Terminal => 0,
        }
    }

    pub fn total(&self) -> u32 {
        self.opening + self.challenge + self.edge_case + self.risk + self.consensus + self.synthesis
    }
}

/// One participant's single contribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DebateTurn {
    /// 1-indexed within the debate.
    pub turn_no: u32,
    pub speaker: String,
    pub phase: DebatePhase,
    pub message: String,
    /// The provider drifted twice and a deterministic message stands in.
    pub fallback: bool,
    pub timestamp: DateTime<Utc>,
}

/// A phase transition record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseTransition {
    pub from: DebatePhase,
    pub to: DebatePhase,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DebateStateError {
    #[error("invalid transition {from} → {to}")]
    InvalidTransition { from: DebatePhase, to: DebatePhase },

    #[error("turn budget of {0} exhausted")]
    BudgetExhausted(u32),

    #[error("debate already terminal")]
    Terminal,
}

/// Append-only record of one debate, anchored to the original query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateTranscript {
    query: String,
    topic: String,
    budget: u32,
    phase: DebatePhase,
    turns: Vec<DebateTurn>,
    transitions: Vec<PhaseTransition>,
}

impl DebateTranscript {
    pub fn new(query: &str, topic: &str, budget: u32) -> Self {
        Self {
            query: query.to_string(),
            topic: topic.to_string(),
            budget,
            phase: DebatePhase::Opening,
            turns: Vec::new(),
            transitions: Vec::new(),
        }
    }

    /// The query every prompt is anchored to.
    pub fn anchored_query(&self) -> &str {
        &self.query
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn phase(&self) -> DebatePhase {
        self.phase
    }

    pub fn budget(&self) -> u32 {
        self.budget
    }

    pub fn turns(&self) -> &[DebateTurn] {
        &self.turns
    }

    pub fn transitions(&self) -> &[PhaseTransition] {
        &self.transitions
    }

    pub fn turns_used(&self) -> u32 {
        self.turns.len() as u32
    }

    pub fn remaining(&self) -> u32 {
        self.budget.saturating_sub(self.turns_used())
    }

    pub fn transition(&mut self, to: DebatePhase, reason: &str) -> Result<(), DebateStateError> {
        if !self.phase.valid_transitions().contains(&to) {
            return Err(DebateStateError::InvalidTransition {
                from: self.phase,
                to,
            });
        }
        self.transitions.push(PhaseTransition {
            from: self.phase,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.phase = to;
        Ok(())
    }

    /// Append a turn in the current phase.
    pub fn push(
        &mut self,
        speaker: &str,
        message: String,
        fallback: bool,
    ) -> Result<&DebateTurn, DebateStateError> {
        if self.phase.is_terminal() {
            return Err(DebateStateError::Terminal);
        }
        if self.remaining() == 0 {
            return Err(DebateStateError::BudgetExhausted(self.budget));
        }
        self.turns.push(DebateTurn {
            turn_no: self.turns_used() + 1,
            speaker: speaker.to_string(),
            phase: self.phase,
            message,
            fallback,
            timestamp: Utc::now(),
        });
        Ok(&self.turns[self.turns.len() - 1])
    }

    /// Prior turns as provider history, each attributed to its speaker.
    pub fn history(&self) -> Vec<ChatMessage> {
        self.turns
            .iter()
            .map(|t| ChatMessage::assistant(&t.speaker, &t.message))
            .collect()
    }

    /// Most recent message from `speaker`.
    pub fn last_from(&self, speaker: &str) -> Option<&DebateTurn> {
        self.turns.iter().rev().find(|t| t.speaker == speaker)
    }

    /// Compact status line.
    pub fn status_line(&self) -> String {
        format!(
            "[{}] turn {}/{} | topic={}",
            self.phase,
            self.turns_used(),
            self.budget,
            self.topic
        )
    }
}

/// How a debate ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStatus {
    /// Every participant agreed to the moderator's proposal.
    Resolved,
    /// No genuine agreement; surfaced to the user as unresolved.
    Flagged,
}

impl std::fmt::Display for ResolutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Resolved => write!(f, "resolved"),
            Self::Flagged => write!(f, "flagged"),
        }
    }
}

/// Outcome of debating one contradiction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateResolution {
    pub contradiction: Contradiction,
    pub resolution_text: String,
    pub status: ResolutionStatus,
    pub turns_used: u32,
    pub transcript: Vec<DebateTurn>,
    /// Why the debate stopped short, when it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl DebateResolution {
    pub fn is_resolved(&self) -> bool {
        self.status == ResolutionStatus::Resolved
    }
}
