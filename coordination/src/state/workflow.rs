//! Per-run aggregate state.
//!
//! [`WorkflowState`] is threaded through every stage by the orchestrator task.
//! Each stage output lives in a write-once [`Slot`] owned by exactly one
//! stage; a second write is a [`StateError`] rather than a silent overwrite.
//! Stage completions are appended to an ordered history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

use crate::critique::Critique;
use crate::debate::DebateResolution;
use crate::state::types::{
    AgentContext, AgentTask, Classification, Contradiction, Finding, Query, TaskStatus,
};
use crate::verifier::VerificationResult;
use crate::workflow::stage::WorkflowStage;
use crate::workflow::synthesis::Synthesis;

/// Errors from writing run state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateError {
    #[error("state slot '{0}' was already written")]
    AlreadyWritten(&'static str),
}

/// A value written at most once.
#[derive(Debug, Clone)]
pub struct Slot<T> {
    name: &'static str,
    value: Option<T>,
}

impl<T> Slot<T> {
    pub fn new(name: &'static str) -> Self {
        Self { name, value: None }
    }

    /// Store `value`, failing if the slot is already filled.
    pub fn fill(&mut self, value: T) -> Result<(), StateError> {
        if self.value.is_some() {
            return Err(StateError::AlreadyWritten(self.name));
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }

    pub fn is_filled(&self) -> bool {
        self.value.is_some()
    }
}

/// How a stage finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Complete,
    Skipped,
}

/// One entry in the stage-completion history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: WorkflowStage,
    pub outcome: StageOutcome,
    pub latency_ms: u64,
    pub finished_at: DateTime<Utc>,
}

/// Aggregate threaded through every stage of one run.
#[derive(Debug)]
pub struct WorkflowState {
    pub query: Query,
    classification: Slot<Classification>,
    context: Slot<Arc<AgentContext>>,
    tasks: Slot<Vec<AgentTask>>,
    contradictions: Slot<Vec<Contradiction>>,
    resolutions: Slot<Vec<DebateResolution>>,
    critiques: Slot<Vec<Critique>>,
    adjusted_findings: Slot<Vec<Finding>>,
    verification: Slot<Vec<VerificationResult>>,
    synthesis: Slot<Synthesis>,
    history: Vec<StageRecord>,
}

impl WorkflowState {
    pub fn new(query: Query) -> Self {
        Self {
            query,
            classification: Slot::new("classification"),
            context: Slot::new("context"),
            tasks: Slot::new("tasks"),
            contradictions: Slot::new("contradictions"),
            resolutions: Slot::new("resolutions"),
            critiques: Slot::new("critiques"),
            adjusted_findings: Slot::new("adjusted_findings"),
            verification: Slot::new("verification"),
            synthesis: Slot::new("synthesis"),
            history: Vec::new(),
        }
    }

    // ── Writers (one per owning stage) ───────────────────────────────

    pub fn set_classification(&mut self, c: Classification) -> Result<(), StateError> {
        self.classification.fill(c)
    }

    pub fn set_context(&mut self, ctx: Arc<AgentContext>) -> Result<(), StateError> {
        self.context.fill(ctx)
    }

    pub fn set_tasks(&mut self, tasks: Vec<AgentTask>) -> Result<(), StateError> {
        self.tasks.fill(tasks)
    }

    pub fn set_contradictions(&mut self, c: Vec<Contradiction>) -> Result<(), StateError> {
        self.contradictions.fill(c)
    }

    pub fn set_resolutions(&mut self, r: Vec<DebateResolution>) -> Result<(), StateError> {
        self.resolutions.fill(r)
    }

    pub fn set_critiques(&mut self, c: Vec<Critique>) -> Result<(), StateError> {
        self.critiques.fill(c)
    }

    pub fn set_adjusted_findings(&mut self, f: Vec<Finding>) -> Result<(), StateError> {
        self.adjusted_findings.fill(f)
    }

    pub fn set_verification(&mut self, v: Vec<VerificationResult>) -> Result<(), StateError> {
        self.verification.fill(v)
    }

    pub fn set_synthesis(&mut self, s: Synthesis) -> Result<(), StateError> {
        self.synthesis.fill(s)
    }

    // ── Readers ──────────────────────────────────────────────────────

    pub fn classification(&self) -> Option<&Classification> {
        self.classification.get()
    }

    pub fn context(&self) -> Option<&Arc<AgentContext>> {
        self.context.get()
    }

    pub fn tasks(&self) -> &[AgentTask] {
        self.tasks.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contradictions(&self) -> &[Contradiction] {
        self.contradictions.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn resolutions(&self) -> &[DebateResolution] {
        self.resolutions.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn critiques(&self) -> &[Critique] {
        self.critiques.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn verification(&self) -> &[VerificationResult] {
        self.verification.get().map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn synthesis(&self) -> Option<&Synthesis> {
        self.synthesis.get()
    }

    /// Findings from tasks that completed, in scheduling order.
    pub fn findings(&self) -> Vec<Finding> {
        self.tasks()
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .filter_map(|t| t.result.clone())
            .collect()
    }

    /// Critique-adjusted findings when the critique stage ran, raw findings
    /// otherwise.
    pub fn final_findings(&self) -> Vec<Finding> {
        match self.adjusted_findings.get() {
            Some(adjusted) => adjusted.clone(),
            None => self.findings(),
        }
    }

    // ── History ──────────────────────────────────────────────────────

    pub fn record_stage(&mut self, stage: WorkflowStage, outcome: StageOutcome, latency_ms: u64) {
        self.history.push(StageRecord {
            stage,
            outcome,
            latency_ms,
            finished_at: Utc::now(),
        });
    }

    pub fn history(&self) -> &[StageRecord] {
        &self.history
    }

    /// Stages that completed (not skipped), in order.
    pub fn completed_stages(&self) -> Vec<WorkflowStage> {
        self.history
            .iter()
            .filter(|r| r.outcome == StageOutcome::Complete)
            .map(|r| r.stage)
            .collect()
    }
}
