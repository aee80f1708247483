//! Agent registry: named analyst variants and capability-based selection.

use std::collections::HashMap;
use tracing::debug;

use super::{normalize_agent_name, SharedAgent};
use crate::state::types::Classification;

/// Registered agents, kept in registration order.
#[derive(Default, Clone)]
pub struct AgentRegistry {
    agents: Vec<(String, SharedAgent)>,
    index: HashMap<String, usize>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `agent` under its normalized name, returning any agent it
    /// replaced.
    pub fn register(&mut self, agent: SharedAgent) -> Option<SharedAgent> {
        let name = normalize_agent_name(agent.name());
        match self.index.get(&name) {
            Some(&i) => Some(std::mem::replace(&mut self.agents[i].1, agent)),
            None => {
                self.index.insert(name.clone(), self.agents.len());
                self.agents.push((name, agent));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<SharedAgent> {
        self.index
            .get(&normalize_agent_name(name))
            .map(|&i| self.agents[i].1.clone())
    }

    pub fn names(&self) -> Vec<String> {
        self.agents.iter().map(|(n, _)| n.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Agents serving any of the classification's tags, in registration
    /// order. Falls back to every registered agent when none match.
    pub fn select(&self, classification: &Classification) -> Vec<String> {
        let matched: Vec<String> = self
            .agents
            .iter()
            .filter(|(_, a)| {
                a.capabilities()
                    .iter()
                    .any(|cap| classification.has_tag(*cap))
            })
            .map(|(n, _)| n.clone())
            .collect();
        if matched.is_empty() {
            debug!(tags = ?classification.tags, "No capability match, selecting all agents");
            self.names()
        } else {
            matched
        }
    }

    /// Normalize and de-duplicate `names`, keeping first occurrences, and
    /// look each one up. Unknown names are kept with `None`.
    pub fn resolve<S: AsRef<str>>(&self, names: &[S]) -> Vec<(String, Option<SharedAgent>)> {
        let mut seen = std::collections::HashSet::new();
        names
            .iter()
            .map(|n| normalize_agent_name(n.as_ref()))
            .filter(|n| !n.is_empty() && seen.insert(n.clone()))
            .map(|n| {
                let agent = self.get(&n);
                (n, agent)
            })
            .collect()
    }
}

impl std::fmt::Debug for AgentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRegistry")
            .field("agents", &self.names())
            .finish()
    }
}
