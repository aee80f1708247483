//! Workflow stage machine.
//!
//! ```text
//! classify → extract ─┬─ (fast) ─────────────────────────────────→ synthesize → done
//!                     └─ (full) → agents → debate → critique → verify ─┘
//! any non-terminal stage → error
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStage {
    Classify,
    Extract,
    Agents,
    Debate,
    Critique,
    Verify,
    Synthesize,
    Done,
    Error,
}

impl WorkflowStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    pub fn valid_transitions(self) -> &'static [WorkflowStage] {
        match self {
            Self::Classify => &[Self::Extract, Self::Error],
            Self::Extract => &[Self::Agents, Self::Synthesize, Self::Error],
            Self::Agents => &[Self::Debate, Self::Error],
            Self::Debate => &[Self::Critique, Self::Error],
            Self::Critique => &[Self::Verify, Self::Error],
            Self::Verify => &[Self::Synthesize, Self::Error],
            Self::Synthesize => &[Self::Done, Self::Error],
            Self::Done | Self::Error => &[],
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Classify => "classify",
            Self::Extract => "extract",
            Self::Agents => "agents",
            Self::Debate => "debate",
            Self::Critique => "critique",
            Self::Verify => "verify",
            Self::Synthesize => "synthesize",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for WorkflowStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid workflow transition {from} → {to}")]
pub struct TransitionError {
    pub from: WorkflowStage,
    pub to: WorkflowStage,
}

/// A recorded stage change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageTransition {
    pub from: WorkflowStage,
    pub to: WorkflowStage,
    pub timestamp: DateTime<Utc>,
    pub reason: String,
}

/// Current stage plus the validated transition log.
#[derive(Debug, Clone)]
pub struct StageMachine {
    current: WorkflowStage,
    transitions: Vec<StageTransition>,
}

impl StageMachine {
    pub fn new() -> Self {
        Self {
            current: WorkflowStage::Classify,
            transitions: Vec::new(),
        }
    }

    pub fn current(&self) -> WorkflowStage {
        self.current
    }

    pub fn transitions(&self) -> &[StageTransition] {
        &self.transitions
    }

    pub fn advance(&mut self, to: WorkflowStage, reason: &str) -> Result<(), TransitionError> {
        if !self.current.valid_transitions().contains(&to) {
            return Err(TransitionError {
                from: self.current,
                to,
            });
        }
        self.transitions.push(StageTransition {
            from: self.current,
            to,
            timestamp: Utc::now(),
            reason: reason.to_string(),
        });
        self.current = to;
        Ok(())
    }

    /// Stages visited so far, starting with `classify`.
    pub fn path(&self) -> Vec<WorkflowStage> {
        std::iter::once(WorkflowStage::Classify)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }
}

impl Default for StageMachine {
    fn default() -> Self {
        Self::new()
    }
}
