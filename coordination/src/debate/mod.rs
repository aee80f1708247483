//! Debate: structured multi-agent resolution of contradictions.
//!
//! # Debate Flow
//!
//! ```text
//! Opening → Challenge → EdgeCase → Risk → Consensus → Synthesis → Terminal
//!    │          │           │        │        │            │
//!    │          └───────────┴────────┘        │            └─ resolution text
//!    │            (history + anchored query)   ├─ all AGREE → resolved
//!    │                                         └─ otherwise → flagged
//!    └─ provider failure / cancel at any point → Terminal (flagged)
//! ```
//!
//! Turns per phase come from [`PhaseBudget`]; a debate never takes more
//! turns than the classification's budget.

pub mod consensus;
pub mod engine;
pub mod guardrails;
pub mod prompts;
pub mod state;

pub use consensus::{parse_vote, tally, Ballot, ConsensusOutcome, Vote};
pub use engine::DebateEngine;
pub use guardrails::{fallback_message, is_anchored, FALLBACK_PREFIX};
pub use state::{
    DebatePhase, DebateResolution, DebateStateError, DebateTranscript, DebateTurn, PhaseBudget,
    PhaseTransition, ResolutionStatus,
};
