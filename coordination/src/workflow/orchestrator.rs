//! Workflow orchestrator: drives one query through every stage.
//!
//! Sole writer of the route decision and sole caller of
//! [`AgentRunner::run_group`]. Each executed stage emits `running` then
//! `complete` (or `error`) on its own stage name; skipped stages emit
//! nothing. Every run ends with exactly one `done` or `error` event.

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::extract::extract;
use super::stage::{StageMachine, StageTransition, WorkflowStage};
use super::synthesis::{Synthesis, Synthesizer};
use crate::agents::{AgentRegistry, AgentRunner};
use crate::cache::Cache;
use crate::config::CoordinationConfig;
use crate::contradiction::ContradictionDetector;
use crate::critique::{apply_adjustments, CritiqueEngine};
use crate::debate::DebateEngine;
use crate::error::{WorkflowError, WorkflowResult};
use crate::events::{EventBus, EventStatus, EventStream, SharedEventBus};
use crate::provider::{CompletionProvider, GuardedProvider};
use crate::rate_limit::RateLimiterSet;
use crate::router::Classifier;
use crate::state::types::{AgentContext, ClaimRef, Classification, Query, Route, TaskStatus};
use crate::state::workflow::{StageOutcome, WorkflowState};
use crate::verifier::{EvidenceIndex, GuardedEvidence, VerificationEngine};

/// External services injected into the engine.
#[derive(Clone)]
pub struct Collaborators {
    pub provider: Arc<dyn CompletionProvider>,
    pub evidence: Arc<dyn EvidenceIndex>,
    pub cache: Arc<dyn Cache>,
    pub registry: Arc<AgentRegistry>,
}

/// Everything one run produced.
#[derive(Debug)]
pub struct WorkflowOutcome {
    pub state: WorkflowState,
    pub transitions: Vec<StageTransition>,
    pub error: Option<WorkflowError>,
}

impl WorkflowOutcome {
    pub fn is_done(&self) -> bool {
        self.error.is_none()
    }

    pub fn synthesis(&self) -> Option<&Synthesis> {
        self.state.synthesis()
    }

    /// Stages entered, in order, starting with `classify`.
    pub fn path(&self) -> Vec<WorkflowStage> {
        std::iter::once(WorkflowStage::Classify)
            .chain(self.transitions.iter().map(|t| t.to))
            .collect()
    }
}

struct Inner {
    config: CoordinationConfig,
    collaborators: Collaborators,
    limiters: Arc<RateLimiterSet>,
    provider: GuardedProvider,
    evidence: GuardedEvidence,
    classifier: Classifier,
    detector: ContradictionDetector,
    critic: CritiqueEngine,
    verifier: VerificationEngine,
    synthesizer: Synthesizer,
}

/// Entry point of the engine. Cheap to clone; clones share rate limiters.
#[derive(Clone)]
pub struct WorkflowOrchestrator {
    inner: Arc<Inner>,
}

impl WorkflowOrchestrator {
    pub fn new(config: CoordinationConfig, collaborators: Collaborators) -> Self {
        let limiters = Arc::new(config.rate_limits.build());
        let provider = GuardedProvider::new(
            collaborators.provider.clone(),
            &limiters,
            config.runner.agent_timeout(),
            config.runner.retry_policy(),
        );
        let evidence = GuardedEvidence::new(
            collaborators.evidence.clone(),
            &limiters,
            config.verification.search_timeout(),
        );
        let inner = Inner {
            classifier: Classifier::new(config.classifier.clone()),
            detector: ContradictionDetector::new(config.contradiction.clone()),
            critic: CritiqueEngine::new(provider.clone(), config.critique.clone()),
            verifier: VerificationEngine::new(
                config.verification.clone(),
                collaborators.cache.clone(),
            ),
            synthesizer: Synthesizer::new(provider.clone(), config.synthesis.clone()),
            provider,
            evidence,
            limiters,
            collaborators,
            config,
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    pub fn config(&self) -> &CoordinationConfig {
        &self.inner.config
    }

    /// Start a run on the tokio runtime and return its event stream.
    /// Dropping the stream cancels the run.
    pub fn run_workflow(&self, query: impl Into<String>) -> EventStream {
        self.run_workflow_with_cancel(query, CancellationToken::new())
    }

    /// Like [`run_workflow`](Self::run_workflow), also stopped by `cancel`.
    pub fn run_workflow_with_cancel(
        &self,
        query: impl Into<String>,
        cancel: CancellationToken,
    ) -> EventStream {
        let (bus, stream) = EventBus::open(cancel.clone());
        let this = self.clone();
        let query = Query::new(query);
        tokio::spawn(async move {
            this.execute(query, bus, cancel).await;
        });
        stream
    }

    /// Run `query` to completion in the current task.
    pub async fn execute(
        &self,
        query: Query,
        bus: SharedEventBus,
        cancel: CancellationToken,
    ) -> WorkflowOutcome {
        let started = Instant::now();
        let query_id = query.id;
        let mut state = WorkflowState::new(query);
        let mut machine = StageMachine::new();
        info!(query_id = %query_id, "Workflow started");

        let result = self.drive(&mut state, &mut machine, &bus, &cancel).await;
        let latency = started.elapsed().as_millis() as u64;

        let error = match result {
            Ok(()) => {
                let payload = done_payload(&state, &machine);
                bus.emit_done(payload, Some(latency));
                info!(query_id = %query_id, latency_ms = latency, "Workflow done");
                None
            }
            Err(e) => {
                let failed_at = machine.current();
                bus.emit(
                    failed_at.as_str(),
                    EventStatus::Error,
                    json!({ "kind": e.kind(), "message": e.to_string() }),
                    None,
                );
                if let Err(t) = machine.advance(WorkflowStage::Error, &e.to_string()) {
                    warn!(error = %t, "Could not record error transition");
                }
                match &e {
                    WorkflowError::Cancelled => warn!(query_id = %query_id, stage = %failed_at, "Workflow cancelled"),
                    _ => error!(query_id = %query_id, stage = %failed_at, error = %e, "Workflow failed"),
                }
                bus.emit_error(e.kind(), e.to_string());
                Some(e)
            }
        };

        WorkflowOutcome {
            state,
            transitions: machine.transitions().to_vec(),
            error,
        }
    }

    async fn drive(
        &self,
        state: &mut WorkflowState,
        machine: &mut StageMachine,
        bus: &SharedEventBus,
        cancel: &CancellationToken,
    ) -> WorkflowResult<()> {
        let inner = &self.inner;

        // ── classify ─────────────────────────────────────────────────
        let t = begin(bus, WorkflowStage::Classify, cancel)?;
        let classification = inner.classifier.classify(&state.query.text)?;
        info!(query_id = %state.query.id, classification = %classification.summary(), "Query classified");
        finish(
            bus,
            state,
            WorkflowStage::Classify,
            t,
            json!({
                "complexity": classification.complexity,
                "route": classification.route,
                "tags": classification.tags,
                "debate_turn_budget": classification.debate_turn_budget,
            }),
        );
        state.set_classification(classification.clone())?;
        machine.advance(WorkflowStage::Extract, "classified")?;

        // ── extract ──────────────────────────────────────────────────
        let t = begin(bus, WorkflowStage::Extract, cancel)?;
        let context = extract(
            &state.query,
            &classification,
            &inner.evidence,
            inner.config.verification.top_k,
            cancel,
        )
        .await?;
        let payload = json!({
            "keywords": context.keywords,
            "periods": context.periods,
            "facts": context.facts.len(),
        });
        let context = Arc::new(context);
        state.set_context(context.clone())?;
        finish(bus, state, WorkflowStage::Extract, t, payload);

        if classification.route == Route::Fast {
            for skipped in [
                WorkflowStage::Agents,
                WorkflowStage::Debate,
                WorkflowStage::Critique,
                WorkflowStage::Verify,
            ] {
                state.record_stage(skipped, StageOutcome::Skipped, 0);
            }
            machine.advance(WorkflowStage::Synthesize, "fast route")?;
        } else {
            machine.advance(WorkflowStage::Agents, "full route")?;
            self.run_full_route(state, machine, bus, cancel, &classification, context)
                .await?;
            machine.advance(WorkflowStage::Synthesize, "verified")?;
        }

        // ── synthesize ───────────────────────────────────────────────
        let t = begin(bus, WorkflowStage::Synthesize, cancel)?;
        let synthesis = inner.synthesizer.synthesize(state, cancel).await;
        let payload = json!({
            "degraded": synthesis.degraded,
            "warnings": synthesis.warnings.len(),
            "flagged_topics": synthesis.flagged_topics,
        });
        state.set_synthesis(synthesis)?;
        finish(bus, state, WorkflowStage::Synthesize, t, payload);
        if cancel.is_cancelled() {
            return Err(WorkflowError::Cancelled);
        }
        machine.advance(WorkflowStage::Done, "synthesized")?;
        Ok(())
    }

    async fn run_full_route(
        &self,
        state: &mut WorkflowState,
        machine: &mut StageMachine,
        bus: &SharedEventBus,
        cancel: &CancellationToken,
        classification: &Classification,
        context: Arc<AgentContext>,
    ) -> WorkflowResult<()> {
        let inner = &self.inner;

        // ── agents ───────────────────────────────────────────────────
        let t = begin(bus, WorkflowStage::Agents, cancel)?;
        let names = inner.collaborators.registry.select(classification);
        let runner = AgentRunner::new(inner.config.runner.clone(), inner.limiters.clone(), bus.clone());
        let tasks = runner
            .run_group(&inner.collaborators.registry, &names, &state.query, &context, cancel)
            .await;
        let complete = tasks.iter().filter(|t| t.status == TaskStatus::Complete).count();
        let failed: Vec<&str> = tasks
            .iter()
            .filter(|t| t.status != TaskStatus::Complete)
            .map(|t| t.agent_name.as_str())
            .collect();
        let payload = json!({ "selected": names, "complete": complete, "failed": failed });
        state.set_tasks(tasks)?;
        finish(bus, state, WorkflowStage::Agents, t, payload);
        machine.advance(WorkflowStage::Debate, "agents finished")?;

        // ── debate ───────────────────────────────────────────────────
        let t = begin(bus, WorkflowStage::Debate, cancel)?;
        let findings = state.findings();
        let contradictions = inner.detector.detect(&findings);
        let engine = DebateEngine::new(inner.provider.clone(), inner.config.debate.clone(), bus.clone());
        let resolutions = engine
            .resolve(&state.query, &contradictions, classification.debate_turn_budget, cancel)
            .await;
        let payload = json!({
            "contradictions": contradictions.len(),
            "resolutions": resolutions
                .iter()
                .map(|r| json!({
                    "topic": r.contradiction.topic,
                    "status": r.status,
                    "turns_used": r.turns_used,
                }))
                .collect::<Vec<Value>>(),
        });
        state.set_contradictions(contradictions)?;
        state.set_resolutions(resolutions)?;
        finish(bus, state, WorkflowStage::Debate, t, payload);
        machine.advance(WorkflowStage::Critique, "debate finished")?;

        // ── critique ─────────────────────────────────────────────────
        let t = begin(bus, WorkflowStage::Critique, cancel)?;
        let critiques = inner
            .critic
            .critique(&state.query, &findings, state.resolutions(), cancel)
            .await;
        let adjusted = apply_adjustments(&findings, &critiques);
        let payload = json!({ "critiques": critiques.len() });
        state.set_critiques(critiques)?;
        state.set_adjusted_findings(adjusted)?;
        finish(bus, state, WorkflowStage::Critique, t, payload);
        machine.advance(WorkflowStage::Verify, "critique finished")?;

        // ── verify ───────────────────────────────────────────────────
        let t = begin(bus, WorkflowStage::Verify, cancel)?;
        let claims: Vec<_> = state
            .final_findings()
            .into_iter()
            .flat_map(|f| {
                let agent = f.agent_name;
                f.claims.into_iter().enumerate().map(move |(i, c)| {
                    (
                        ClaimRef {
                            agent_name: agent.clone(),
                            claim_index: i,
                        },
                        c,
                    )
                })
            })
            .collect();
        let results = inner
            .verifier
            .verify(&claims, &inner.evidence, cancel)
            .await?;
        let payload = json!({
            "checked": results.len(),
            "verified": results.iter().filter(|r| r.verified).count(),
        });
        state.set_verification(results)?;
        finish(bus, state, WorkflowStage::Verify, t, payload);
        Ok(())
    }
}

/// Emit `running` for `stage` unless the run has been cancelled.
fn begin(
    bus: &SharedEventBus,
    stage: WorkflowStage,
    cancel: &CancellationToken,
) -> WorkflowResult<Instant> {
    if cancel.is_cancelled() {
        return Err(WorkflowError::Cancelled);
    }
    bus.emit(stage.as_str(), EventStatus::Running, json!({}), None);
    Ok(Instant::now())
}

fn finish(
    bus: &SharedEventBus,
    state: &mut WorkflowState,
    stage: WorkflowStage,
    started: Instant,
    payload: Value,
) {
    let latency = started.elapsed().as_millis() as u64;
    state.record_stage(stage, StageOutcome::Complete, latency);
    bus.emit(stage.as_str(), EventStatus::Complete, payload, Some(latency));
}

fn done_payload(state: &WorkflowState, machine: &StageMachine) -> Value {
    let path: Vec<&str> = machine.path().iter().map(|s| s.as_str()).collect();
    json!({
        "query_id": state.query.id,
        "synthesis": state.synthesis(),
        "stages": path,
    })
}
