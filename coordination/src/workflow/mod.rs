//! Workflow: the per-query pipeline.
//!
//! ```text
//! classify → extract → [route] ─ fast ─────────────────────────────────→ synthesize → done
//!                              └ full → agents → debate → critique → verify ─┘
//! ```
//!
//! Every stage emits onto the run's [`EventBus`](crate::events::EventBus).

pub mod extract;
pub mod orchestrator;
pub mod stage;
pub mod synthesis;

pub use orchestrator::{Collaborators, WorkflowOrchestrator, WorkflowOutcome};
pub use stage::{StageMachine, StageTransition, TransitionError, WorkflowStage};
pub use synthesis::{Synthesis, Synthesizer};
