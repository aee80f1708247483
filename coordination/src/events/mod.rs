//! Event streaming for workflow runs.
//!
//! One [`EventBus`] per run decouples the orchestrator task from whoever is
//! watching it:
//!
//! ```text
//! ┌──────────────┐  emit (non-blocking)  ┌──────────────┐  poll  ┌──────────────┐
//! │ Orchestrator │──────────────────────▶│  mpsc queue  │───────▶│ EventStream  │
//! │  + stages    │                       │ (unbounded)  │        │ (1 consumer) │
//! └──────────────┘                       └──────────────┘        └──────┬───────┘
//!        ▲                                                              │
//!        └──────────────────── cancel on drop ──────────────────────────┘
//! ```
//!
//! Every run ends in exactly one `done` or `error` event.

pub mod bus;
pub mod types;

pub use bus::{EventBus, EventBusError, EventBusResult, EventStream, SharedEventBus};
pub use types::{
    agent_stage, EventStatus, WorkflowEvent, STAGE_DEBATE_TURN, STAGE_DONE, STAGE_ERROR,
};
