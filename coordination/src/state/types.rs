//! Core types threaded through a workflow run.
//!
//! Everything here lives for one run: it is created when the query arrives
//! and dropped when the terminal event has been emitted.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AgentError, ErrorKind};
use crate::verifier::Evidence;

/// Unique identifier for one workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(pub uuid::Uuid);

impl QueryId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for QueryId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Immutable user query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: QueryId,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            id: QueryId::new(),
            text: text.into(),
            received_at: Utc::now(),
        }
    }
}

/// Complexity tier assigned by the classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Simple,
    Medium,
    Complex,
    Critical,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Medium => write!(f, "medium"),
            Self::Complex => write!(f, "complex"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

/// Capability a query calls for; agents declare which ones they serve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityTag {
    /// Trends, history, forecasts.
    Temporal,
    /// Hypotheticals and what-if analysis.
    Scenario,
    /// Causal or comparative analysis.
    Analytical,
    /// Recommendations and policy choices.
    Strategic,
    /// Risk, thresholds and warnings.
    Alerting,
}

impl CapabilityTag {
    pub fn all() -> &'static [CapabilityTag] {
        &[
            Self::Temporal,
            Self::Scenario,
            Self::Analytical,
            Self::Strategic,
            Self::Alerting,
        ]
    }
}

impl std::fmt::Display for CapabilityTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Temporal => write!(f, "temporal"),
            Self::Scenario => write!(f, "scenario"),
            Self::Analytical => write!(f, "analytical"),
            Self::Strategic => write!(f, "strategic"),
            Self::Alerting => write!(f, "alerting"),
        }
    }
}

/// Path through the workflow chosen from the complexity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// classify → extract → synthesize.
    Fast,
    /// Adds agents, debate, critique and verification.
    Full,
}

impl std::fmt::Display for Route {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fast => write!(f, "fast"),
            Self::Full => write!(f, "full"),
        }
    }
}

/// Classifier output. Produced once per run, read-only afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub complexity: Complexity,
    /// Sorted, de-duplicated.
    pub tags: Vec<CapabilityTag>,
    pub route: Route,
    /// Maximum debate turns per contradiction.
    pub debate_turn_budget: u32,
    /// Patterns that fired, for logging and audit.
    pub signals: Vec<String>,
}

impl Classification {
    pub fn has_tag(&self, tag: CapabilityTag) -> bool {
        self.tags.contains(&tag)
    }

    /// Compact summary for logging.
    pub fn summary(&self) -> String {
        let tags: Vec<String> = self.tags.iter().map(|t| t.to_string()).collect();
        format!(
            "complexity={} route={} tags=[{}] debate_budget={}",
            self.complexity,
            self.route,
            tags.join(","),
            self.debate_turn_budget
        )
    }
}

/// Read-only context handed to every agent, produced by the extract stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentContext {
    pub query_id: QueryId,
    pub tags: Vec<CapabilityTag>,
    /// Content keywords pulled from the query.
    pub keywords: Vec<String>,
    /// Time periods mentioned in the query (years, quarters, months).
    pub periods: Vec<String>,
    /// Evidence retrieved for the query as a whole.
    pub facts: Vec<Evidence>,
}

/// One assertion inside a finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claim {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub citation: Option<String>,
    /// Explicit topic key; derived from the text when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

impl Claim {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            value: None,
            citation: None,
            topic: None,
        }
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_citation(mut self, citation: impl Into<String>) -> Self {
        self.citation = Some(citation.into());
        self
    }

    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    /// Whether the claim is numeric or factual enough to check against
    /// evidence.
    pub fn is_checkable(&self) -> bool {
        self.value.is_some()
            || self.citation.is_some()
            || self.text.chars().any(|c| c.is_ascii_digit())
    }
}

/// Structured output of one analysis agent for one query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Finding {
    pub agent_name: String,
    pub claims: Vec<Claim>,
    pub confidence: f64,
}

impl Finding {
    pub fn new(agent_name: impl Into<String>, claims: Vec<Claim>, confidence: f64) -> Self {
        Self {
            agent_name: agent_name.into(),
            claims,
            confidence,
        }
    }

    /// Check structural invariants; a violation is a validation error.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!(
                "confidence {} outside [0, 1] for agent {}",
                self.confidence, self.agent_name
            ));
        }
        if self.claims.iter().any(|c| c.text.trim().is_empty()) {
            return Err(format!("empty claim text from agent {}", self.agent_name));
        }
        if self
            .claims
            .iter()
            .any(|c| c.value.map(|v| !v.is_finite()).unwrap_or(false))
        {
            return Err(format!("non-finite claim value from agent {}", self.agent_name));
        }
        Ok(())
    }
}

/// Stable reference to one claim within a run's findings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClaimRef {
    pub agent_name: String,
    pub claim_index: usize,
}

impl std::fmt::Display for ClaimRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{}", self.agent_name, self.claim_index)
    }
}

/// Lifecycle of an agent task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Error,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Error | Self::Timeout)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Error => write!(f, "error"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// Why a task did not complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskFailure {
    pub kind: ErrorKind,
    pub message: String,
}

/// One scheduled agent invocation. Written only by the agent runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTask {
    pub agent_name: String,
    pub status: TaskStatus,
    pub result: Option<Finding>,
    pub failure: Option<TaskFailure>,
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AgentTask {
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            agent_name: agent_name.into(),
            status: TaskStatus::Pending,
            result: None,
            failure: None,
            attempts: 0,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn start(&mut self) {
        self.status = TaskStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn complete(&mut self, finding: Finding, attempts: u32) {
        self.status = TaskStatus::Complete;
        self.result = Some(finding);
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, err: &AgentError, attempts: u32) {
        self.status = err.task_status();
        self.failure = Some(TaskFailure {
            kind: err.kind(),
            message: err.to_string(),
        });
        self.attempts = attempts;
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration, when both ends are known.
    pub fn latency_ms(&self) -> Option<u64> {
        match (self.started_at, self.finished_at) {
            (Some(s), Some(f)) => Some((f - s).num_milliseconds().max(0) as u64),
            _ => None,
        }
    }
}

/// One side of a contradiction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpposingClaim {
    pub agent_name: String,
    pub claim: Claim,
    pub confidence: f64,
}

/// Conflict between two or more agents on the same topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    pub topic: String,
    pub opposing: Vec<OpposingClaim>,
}

impl Contradiction {
    /// Agents holding a position, in order of appearance.
    pub fn participants(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        for o in &self.opposing {
            if !seen.contains(&o.agent_name.as_str()) {
                seen.push(o.agent_name.as_str());
            }
        }
        seen
    }

    /// The claim held by `agent`, if any.
    pub fn position_of(&self, agent: &str) -> Option<&OpposingClaim> {
        self.opposing.iter().find(|o| o.agent_name == agent)
    }
}
