//! Completion provider seam.
//!
//! The engine never talks to an LLM API directly; every prompt goes through
//! a [`CompletionProvider`] injected at construction time. Concrete adapters
//! live outside this crate.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::rate_limit::{RateLimiter, RateLimiterSet};
use crate::resilience::{retry_with_backoff, RetryPolicy};

/// Errors from a completion provider.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("completion timed out after {0}s")]
    Timeout(u64),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("rate limited: retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("provider error: {0}")]
    Provider(String),

    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

/// Role of a message in the conversation history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for ChatRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// One prior message passed as conversation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    /// Optional speaker label (debate participant name).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            name: None,
            content: content.into(),
        }
    }

    pub fn assistant(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            name: Some(name.into()),
            content: content.into(),
        }
    }
}

/// Black-box text completion service.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Complete `prompt` given prior `history`, failing with
    /// [`ProviderError::Timeout`] if no answer arrives within `timeout`.
    async fn complete(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        timeout: Duration,
    ) -> Result<String, ProviderError>;

    /// Resource key used for rate limiting calls to this provider.
    fn resource(&self) -> &str {
        "completion"
    }
}

/// Call `provider` under a hard timeout, independent of whether the provider
/// honours the timeout it is handed.
pub async fn complete_with_timeout(
    provider: &dyn CompletionProvider,
    prompt: &str,
    history: &[ChatMessage],
    timeout: Duration,
) -> Result<String, ProviderError> {
    match tokio::time::timeout(timeout, provider.complete(prompt, history, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(ProviderError::Timeout(timeout.as_secs())),
    }
}

/// Failure of a guarded provider call.
#[derive(Debug, Clone, Error)]
pub enum CallError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("call cancelled")]
    Cancelled,
}

/// A provider wrapped with its rate limiter, per-call timeout and retry
/// policy. Cheap to clone; stages share one.
#[derive(Clone)]
pub struct GuardedProvider {
    provider: Arc<dyn CompletionProvider>,
    limiter: Arc<RateLimiter>,
    timeout: Duration,
    policy: RetryPolicy,
}

impl GuardedProvider {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        limiters: &RateLimiterSet,
        timeout: Duration,
        policy: RetryPolicy,
    ) -> Self {
        let limiter = limiters.limiter(provider.resource());
        Self {
            provider,
            limiter,
            timeout,
            policy,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Rate-limited, retried completion that stops as soon as `cancel` fires.
    pub async fn complete(
        &self,
        label: &str,
        prompt: &str,
        history: &[ChatMessage],
        cancel: &CancellationToken,
    ) -> Result<String, CallError> {
        let call = retry_with_backoff(&self.policy, Some(&self.limiter), label, |_| {
            complete_with_timeout(self.provider.as_ref(), prompt, history, self.timeout)
        });
        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CallError::Cancelled),
            (result, _attempts) = call => result.map_err(CallError::from),
        }
    }
}

impl std::fmt::Debug for GuardedProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedProvider")
            .field("resource", &self.limiter.resource())
            .field("timeout", &self.timeout)
            .field("policy", &self.policy)
            .finish()
    }
}
