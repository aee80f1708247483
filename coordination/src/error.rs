//! Error taxonomy shared by every stage of the workflow.
//!
//! Each module owns a `thiserror` enum for its own failures; all of them map
//! onto [`ErrorKind`], the machine-readable kind that travels in terminal
//! event payloads next to a human-readable message.
//!
//! ```text
//! Kind                      | Handling
//! --------------------------|------------------------------------------------
//! transient_provider        | retried with a fixed bound, then AgentTask error
//! validation                | never retried, surfaced immediately
//! rate_limited              | absorbed as RateLimiter delay
//! provider                  | surfaced as AgentTask error, not retried
//! contradiction_unresolved  | first-class `flagged` outcome, not an error
//! group_timeout             | pending AgentTasks forced to error, run continues
//! cancelled                 | run drains to a terminal `error` event
//! classification            | aborts the run
//! internal                  | aborts the run
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::state::types::TaskStatus;

/// Machine-readable failure kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    TransientProvider,
    Validation,
    RateLimited,
    Provider,
    ContradictionUnresolved,
    GroupTimeout,
    Cancelled,
    Classification,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::TransientProvider => write!(f, "transient_provider"),
            Self::Validation => write!(f, "validation"),
            Self::RateLimited => write!(f, "rate_limited"),
            Self::Provider => write!(f, "provider"),
            Self::ContradictionUnresolved => write!(f, "contradiction_unresolved"),
            Self::GroupTimeout => write!(f, "group_timeout"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::Classification => write!(f, "classification"),
            Self::Internal => write!(f, "internal"),
        }
    }
}

/// Errors raised by analysis agents and by the runner wrapped around them.
#[derive(Debug, Clone, Error)]
pub enum AgentError {
    #[error("agent call timed out after {0}s")]
    Timeout(u64),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("rate limited by upstream")]
    RateLimited { retry_after: Option<std::time::Duration> },

    #[error("invalid agent output: {0}")]
    Validation(String),

    #[error("agent failed: {0}")]
    Failed(String),

    #[error("unknown agent: {0}")]
    UnknownAgent(String),

    #[error("agent group ceiling of {0}s elapsed before completion")]
    GroupTimeout(u64),

    #[error("run cancelled")]
    Cancelled,
}

impl AgentError {
    /// Machine-readable kind of this failure.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Timeout(_) | Self::Connection(_) => ErrorKind::TransientProvider,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::Failed(_) => ErrorKind::Provider,
            Self::Validation(_) | Self::UnknownAgent(_) => ErrorKind::Validation,
            Self::GroupTimeout(_) => ErrorKind::GroupTimeout,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Terminal task status this error leaves behind.
    pub fn task_status(&self) -> TaskStatus {
        match self {
            Self::Timeout(_) => TaskStatus::Timeout,
            _ => TaskStatus::Error,
        }
    }
}

impl From<crate::provider::ProviderError> for AgentError {
    fn from(err: crate::provider::ProviderError) -> Self {
        use crate::provider::ProviderError;
        match err {
            ProviderError::Timeout(secs) => Self::Timeout(secs),
            ProviderError::Connection(msg) => Self::Connection(msg),
            ProviderError::RateLimited { retry_after } => Self::RateLimited { retry_after },
            ProviderError::Provider(msg) => Self::Failed(msg),
            ProviderError::InvalidResponse(msg) => Self::Validation(msg),
        }
    }
}

/// Orchestrator-level failure. The only kind that aborts a run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Classification(#[from] crate::router::ClassifyError),

    #[error(transparent)]
    Transition(#[from] crate::workflow::stage::TransitionError),

    #[error(transparent)]
    State(#[from] crate::state::workflow::StateError),

    #[error("run cancelled")]
    Cancelled,
}

impl WorkflowError {
    /// Machine-readable kind carried in the terminal `error` event.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Classification(_) => ErrorKind::Classification,
            Self::Transition(_) | Self::State(_) => ErrorKind::Internal,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Result type alias for orchestrator operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;
