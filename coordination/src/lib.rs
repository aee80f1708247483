//! Council Coordination Library
//!
//! Multi-agent analysis engine. A natural-language query is classified,
//! fanned out to domain analysts under rate limits and timeouts, its
//! contradictions are debated to a `resolved` or `flagged` outcome,
//! critiqued, verified against evidence and synthesized into one answer,
//! while every step streams onto a per-run event bus.
//!
//! # Pipeline
//!
//! ```text
//! query ─▶ classify ─▶ extract ─┬─ simple ──────────────────────────────────────▶ synthesize ─▶ done
//!                               └─ medium+ ─▶ agents ─▶ debate ─▶ critique ─▶ verify ──┘
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use coordination::{Collaborators, CoordinationConfig, WorkflowOrchestrator};
//! use futures::StreamExt;
//!
//! let orchestrator = WorkflowOrchestrator::new(CoordinationConfig::default(), collaborators);
//! let mut events = orchestrator.run_workflow("How will unemployment evolve through 2025?");
//! while let Some(event) = events.next().await {
//!     println!("{} {}", event.stage, event.status);
//! }
//! ```

#![allow(clippy::uninlined_format_args)]

pub mod agents;
pub mod cache;
pub mod config;
pub mod contradiction;
pub mod critique;
pub mod debate;
pub mod error;
pub mod events;
pub mod provider;
pub mod rate_limit;
pub mod resilience;
pub mod router;
pub mod state;
pub mod verifier;
pub mod workflow;

// Re-export collaborator seams
pub use agents::{AgentRegistry, AgentRunner, AnalysisAgent, SharedAgent};
pub use cache::{Cache, InMemoryCache, NoCache};
pub use provider::{CallError, ChatMessage, ChatRole, CompletionProvider, GuardedProvider, ProviderError};
pub use verifier::{Evidence, EvidenceError, EvidenceIndex, GuardedEvidence, LookupError, NoEvidence};

// Re-export configuration and errors
pub use config::{ConfigError, CoordinationConfig};
pub use error::{AgentError, ErrorKind, WorkflowError, WorkflowResult};

// Re-export event types
pub use events::{EventBus, EventStatus, EventStream, SharedEventBus, WorkflowEvent};

// Re-export run state types
pub use state::{
    AgentContext, AgentTask, CapabilityTag, Claim, ClaimRef, Classification, Complexity,
    Contradiction, Finding, Query, QueryId, Route, TaskStatus, WorkflowState,
};

// Re-export stage engines
pub use contradiction::ContradictionDetector;
pub use critique::{Critique, CritiqueEngine, Severity};
pub use debate::{DebateEngine, DebateResolution, DebateTurn, ResolutionStatus};
pub use rate_limit::{RateLimiter, RateLimiterSet};
pub use resilience::{DegradationLevel, RetryPolicy};
pub use router::{Classifier, ClassifyError};
pub use verifier::{VerificationEngine, VerificationResult};
pub use workflow::{Collaborators, Synthesis, WorkflowOrchestrator, WorkflowOutcome, WorkflowStage};
