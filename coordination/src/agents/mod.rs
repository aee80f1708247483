//! Domain-expert analysis agents.
//!
//! Every agent implements [`AnalysisAgent`]; concrete variants are held in an
//! [`AgentRegistry`] and dispatched by normalized name. The
//! [`AgentRunner`] wraps each invocation with rate limiting, a hard timeout,
//! bounded retry and a guaranteed terminal event.

pub mod registry;
pub mod runner;

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::AgentError;
use crate::state::types::{AgentContext, CapabilityTag, Finding, Query};

pub use registry::AgentRegistry;
pub use runner::AgentRunner;

/// A pluggable domain-expert analyst.
#[async_trait]
pub trait AnalysisAgent: Send + Sync {
    /// Registry name; normalized before use.
    fn name(&self) -> &str;

    /// Resource key this agent's calls are rate limited under.
    fn dependency(&self) -> &str;

    /// Capabilities this agent serves.
    fn capabilities(&self) -> &[CapabilityTag];

    /// Analyze `query` and return a structured finding.
    async fn analyze(&self, query: &Query, context: &AgentContext) -> Result<Finding, AgentError>;
}

pub type SharedAgent = Arc<dyn AnalysisAgent>;

/// Canonical agent name: trimmed, lowercase, `-` and whitespace as `_`.
pub fn normalize_agent_name(name: &str) -> String {
    name.trim()
        .chars()
        .map(|c| {
            if c == '-' || c.is_whitespace() {
                '_'
            } else {
                c.to_ascii_lowercase()
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_agent_name() {
        assert_eq!(normalize_agent_name("  Labor-Market "), "labor_market");
        assert_eq!(normalize_agent_name("Housing Analyst"), "housing_analyst");
        assert_eq!(normalize_agent_name("fed_policy"), "fed_policy");
    }
}
