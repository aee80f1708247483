//! Run-scoped state for the council workflow.
//!
//! - [`types`]: queries, classifications, findings, agent tasks, contradictions
//! - [`workflow`]: the write-once aggregate threaded through every stage
//!
//! Nothing here outlives a run. The orchestrator task is the only writer of
//! [`WorkflowState`]; agent tasks are written only by the agent runner.

pub mod types;
pub mod workflow;

pub use types::{
    AgentContext, AgentTask, CapabilityTag, Claim, ClaimRef, Classification, Complexity,
    Contradiction, Finding, OpposingClaim, Query, QueryId, Route, TaskFailure, TaskStatus,
};
pub use workflow::{Slot, StageOutcome, StageRecord, StateError, WorkflowState};
