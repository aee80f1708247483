//! End-to-end workflow tests with scripted collaborators (no network).
//!
//! Covers: routing, stage events, agent fan-out under the group ceiling,
//! debate triggering, a stalled evidence index, cancellation (including a
//! dropped stream) and the single-terminal-event contract.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use coordination::events::{STAGE_DEBATE_TURN, STAGE_DONE, STAGE_ERROR};
use coordination::{
    AgentContext, AgentError, AgentRegistry, AgentRunner, AnalysisAgent, CapabilityTag, ChatMessage,
    Claim, Collaborators, CompletionProvider, CoordinationConfig, ErrorKind, EventBus,
    EventStatus, Evidence, EvidenceError, EvidenceIndex, Finding, NoCache, NoEvidence,
    ProviderError, Query, RateLimiterSet,
    ResolutionStatus, Route, TaskStatus, WorkflowError, WorkflowEvent, WorkflowOrchestrator,
    WorkflowStage,
};

// ── Scripted collaborators ─────────────────────────────────────────

/// Answers every prompt kind on topic.
struct ScriptedProvider;

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    async fn complete(
        &self,
        prompt: &str,
        _history: &[ChatMessage],
        _timeout: Duration,
    ) -> Result<String, ProviderError> {
        let reply = if prompt.contains("Reply with AGREE or DISAGREE") {
            "AGREE\nThe reconciled unemployment figure is reasonable."
        } else if prompt.contains("adversarial reviewer") {
            "SEVERITY: low\nADJUSTMENT: -0.05\nRESOLUTION: check the BLS release\nFigures may be revised."
        } else if prompt.contains("Write a concise, direct answer") {
            "Unemployment is roughly 4%."
        } else {
            "Unemployment data for March 2024 supports a figure near 4%."
        };
        Ok(reply.to_string())
    }
}

enum Behavior {
    Claims(Vec<Claim>, f64),
    Hang,
}

struct TestAgent {
    name: String,
    caps: Vec<CapabilityTag>,
    behavior: Behavior,
}

impl TestAgent {
    fn claims(name: &str, claims: &[&str], confidence: f64) -> Arc<dyn AnalysisAgent> {
        Arc::new(Self {
            name: name.to_string(),
            caps: vec![CapabilityTag::Analytical, CapabilityTag::Temporal],
            behavior: Behavior::Claims(claims.iter().map(|c| Claim::new(*c)).collect(), confidence),
        })
    }

    fn hang(name: &str) -> Arc<dyn AnalysisAgent> {
        Arc::new(Self {
            name: name.to_string(),
            caps: vec![CapabilityTag::Temporal],
            behavior: Behavior::Hang,
        })
    }
}

#[async_trait]
impl AnalysisAgent for TestAgent {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependency(&self) -> &str {
        "fred"
    }

    fn capabilities(&self) -> &[CapabilityTag] {
        &self.caps
    }

    async fn analyze(&self, _query: &Query, _context: &AgentContext) -> Result<Finding, AgentError> {
        match &self.behavior {
            Behavior::Claims(claims, confidence) => {
                Ok(Finding::new(&self.name, claims.clone(), *confidence))
            }
            Behavior::Hang => std::future::pending().await,
        }
    }
}

/// Answers the first `answered` searches with nothing, then never returns.
struct HungEvidence {
    answered: u32,
    started: AtomicU32,
    in_flight: Arc<AtomicU32>,
}

impl HungEvidence {
    fn new(answered: u32) -> Arc<Self> {
        Arc::new(Self {
            answered,
            started: AtomicU32::new(0),
            in_flight: Arc::new(AtomicU32::new(0)),
        })
    }
}

/// Decrements the in-flight count when a search future is dropped.
struct InFlight(Arc<AtomicU32>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EvidenceIndex for HungEvidence {
    async fn search(&self, _claim_text: &str, _top_k: usize) -> Result<Vec<Evidence>, EvidenceError> {
        if self.started.fetch_add(1, Ordering::SeqCst) < self.answered {
            return Ok(Vec::new());
        }
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight(self.in_flight.clone());
        std::future::pending().await
    }
}

fn test_config() -> CoordinationConfig {
    let mut config = CoordinationConfig::default();
    config.rate_limits.default_calls_per_second = 0.0;
    config.runner.base_backoff_ms = 10;
    config
}

fn orchestrator(config: CoordinationConfig, agents: Vec<Arc<dyn AnalysisAgent>>) -> WorkflowOrchestrator {
    orchestrator_with_evidence(config, agents, Arc::new(NoEvidence))
}

fn orchestrator_with_evidence(
    config: CoordinationConfig,
    agents: Vec<Arc<dyn AnalysisAgent>>,
    evidence: Arc<dyn EvidenceIndex>,
) -> WorkflowOrchestrator {
    let mut registry = AgentRegistry::new();
    for agent in agents {
        registry.register(agent);
    }
    WorkflowOrchestrator::new(
        config,
        Collaborators {
            provider: Arc::new(ScriptedProvider),
            evidence,
            cache: Arc::new(NoCache),
            registry: Arc::new(registry),
        },
    )
}

fn contradicting_agents() -> Vec<Arc<dyn AnalysisAgent>> {
    vec![
        TestAgent::claims("labor", &["Unemployment is 3.2% in March 2024"], 0.7),
        TestAgent::claims("macro", &["Unemployment is 4.1% in March 2024"], 0.8),
    ]
}

fn terminal_count(events: &[WorkflowEvent]) -> usize {
    events.iter().filter(|e| e.is_terminal()).count()
}

fn completed_stages(events: &[WorkflowEvent]) -> Vec<&str> {
    events
        .iter()
        .filter(|e| e.status == EventStatus::Complete && !e.is_terminal())
        .filter(|e| !e.stage.starts_with("agent:"))
        .map(|e| e.stage.as_str())
        .collect()
}

// ── Routing ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_simple_query_takes_fast_path() {
    let orch = orchestrator(test_config(), contradicting_agents());
    let events: Vec<WorkflowEvent> = orch.run_workflow("What is the unemployment rate?").collect().await;

    assert_eq!(terminal_count(&events), 1);
    let last = events.last().unwrap();
    assert_eq!(last.stage, STAGE_DONE);
    assert_eq!(last.payload["synthesis"]["answer"], "Unemployment is roughly 4%.");
    assert_eq!(last.payload["synthesis"]["route"], "fast");

    let stages = completed_stages(&events);
    assert!(stages.len() <= 3);
    assert_eq!(stages, vec!["classify", "extract", "synthesize"]);
    assert!(events.iter().all(|e| !e.stage.starts_with("agent:")
        && e.stage != "agents"
        && e.stage != "debate"
        && e.stage != "critique"));
}

#[tokio::test]
async fn test_complex_query_with_contradiction_runs_every_stage() {
    let orch = orchestrator(test_config(), contradicting_agents());
    let bus = EventBus::new().shared();
    let stream = bus.events().unwrap();
    let query = Query::new("Why did unemployment rise since 2022, and what should the Fed do about inflation?");

    let outcome = orch.execute(query, bus, CancellationToken::new()).await;
    let events: Vec<WorkflowEvent> = stream.collect().await;

    assert!(outcome.is_done());
    let classification = outcome.state.classification().unwrap();
    assert_eq!(classification.route, Route::Full);
    assert!(classification.debate_turn_budget >= 40);

    assert_eq!(
        outcome.path(),
        vec![
            WorkflowStage::Classify,
            WorkflowStage::Extract,
            WorkflowStage::Agents,
            WorkflowStage::Debate,
            WorkflowStage::Critique,
            WorkflowStage::Verify,
            WorkflowStage::Synthesize,
            WorkflowStage::Done,
        ]
    );
    assert_eq!(
        completed_stages(&events),
        vec!["classify", "extract", "agents", "debate", "critique", "verify", "synthesize"]
    );

    assert_eq!(outcome.state.contradictions().len(), 1);
    let resolution = &outcome.state.resolutions()[0];
    assert_eq!(resolution.status, ResolutionStatus::Resolved);
    assert!(resolution.turns_used <= classification.debate_turn_budget);

    let turns = events.iter().filter(|e| e.stage == STAGE_DEBATE_TURN).count();
    assert_eq!(turns as u32, resolution.turns_used);
    assert!(!outcome.state.critiques().is_empty());
    assert_eq!(terminal_count(&events), 1);
}

// ── Agent group ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_group_ceiling_with_unresponsive_agents() {
    let mut config = test_config();
    config.runner.agent_timeout_secs = 120;
    config.runner.group_timeout_secs = 30;

    let topics = ["payrolls", "wages", "housing", "retail", "credit", "exports", "energy"];
    let mut agents: Vec<Arc<dyn AnalysisAgent>> = topics
        .iter()
        .map(|t| TestAgent::claims(&format!("{t}_analyst"), &[format!("{t} remains steady").as_str()], 0.8))
        .collect();
    agents.extend((0..5).map(|i| TestAgent::hang(&format!("silent_{i}"))));

    let orch = orchestrator(config, agents);
    let bus = EventBus::new().shared();
    let stream = bus.events().unwrap();
    let outcome = orch
        .execute(
            Query::new("How has unemployment trended since 2020?"),
            bus,
            CancellationToken::new(),
        )
        .await;
    let events: Vec<WorkflowEvent> = stream.collect().await;

    assert!(outcome.is_done());
    assert_eq!(events.last().unwrap().stage, STAGE_DONE);
    assert_eq!(terminal_count(&events), 1);

    let tasks = outcome.state.tasks();
    assert_eq!(tasks.len(), 12);
    assert!(tasks.iter().all(|t| t.status.is_terminal()));
    assert_eq!(tasks.iter().filter(|t| t.status == TaskStatus::Complete).count(), 7);
    let failed: Vec<_> = tasks.iter().filter(|t| t.status == TaskStatus::Error).collect();
    assert_eq!(failed.len(), 5);
    assert!(failed
        .iter()
        .all(|t| t.failure.as_ref().unwrap().kind == ErrorKind::GroupTimeout));

    let agent_terminals = events
        .iter()
        .filter(|e| e.stage.starts_with("agent:"))
        .filter(|e| matches!(e.status, EventStatus::Complete | EventStatus::Error))
        .count();
    assert_eq!(agent_terminals, 12);

    let synthesis = outcome.synthesis().unwrap();
    assert_eq!(synthesis.warnings.iter().filter(|w| w.contains("did not complete")).count(), 5);
}

#[tokio::test]
async fn test_duplicate_agent_names_scheduled_once() {
    let mut registry = AgentRegistry::new();
    for agent in contradicting_agents() {
        registry.register(agent);
    }
    let runner = AgentRunner::new(
        test_config().runner,
        Arc::new(RateLimiterSet::new(0.0)),
        EventBus::new().shared(),
    );
    let tasks = runner
        .run_group(
            &registry,
            &["labor", "macro", "Labor"],
            &Query::new("unemployment"),
            &AgentContext::default(),
            &CancellationToken::new(),
        )
        .await;
    let names: Vec<&str> = tasks.iter().map(|t| t.agent_name.as_str()).collect();
    assert_eq!(names, vec!["labor", "macro"]);
}

// ── Evidence index ─────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn test_stalled_evidence_index_degrades_and_finishes() {
    let mut config = test_config();
    config.verification.search_timeout_secs = 10;
    let evidence = HungEvidence::new(0);
    let orch = orchestrator_with_evidence(config, contradicting_agents(), evidence.clone());
    let bus = EventBus::new().shared();
    let stream = bus.events().unwrap();

    let start = Instant::now();
    let outcome = orch
        .execute(
            Query::new("Why did unemployment rise since 2022, and what should the Fed do about inflation?"),
            bus,
            CancellationToken::new(),
        )
        .await;
    let events: Vec<WorkflowEvent> = stream.collect().await;

    assert!(outcome.is_done());
    assert_eq!(events.last().unwrap().stage, STAGE_DONE);
    assert_eq!(terminal_count(&events), 1);
    assert!(outcome.state.context().unwrap().facts.is_empty());

    // One search in extract, one per checkable claim in verify; each hits the ceiling.
    let verification = outcome.state.verification();
    assert_eq!(verification.len(), 2);
    assert!(verification
        .iter()
        .all(|v| !v.verified && v.warning.as_deref().unwrap().contains("timed out")));
    assert_eq!(evidence.started.load(Ordering::SeqCst), 3);
    assert!(Instant::now() - start >= Duration::from_secs(30));
    assert_eq!(evidence.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_stalled_extract() {
    let mut config = test_config();
    config.verification.search_timeout_secs = 600;
    let evidence = HungEvidence::new(0);
    let orch = orchestrator_with_evidence(config, contradicting_agents(), evidence.clone());
    let bus = EventBus::new().shared();
    let stream = bus.events().unwrap().detach();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let start = Instant::now();
    let outcome = orch
        .execute(Query::new("What is the unemployment rate?"), bus, cancel)
        .await;
    let events: Vec<WorkflowEvent> = stream.collect().await;

    assert!(matches!(outcome.error, Some(WorkflowError::Cancelled)));
    assert!(Instant::now() - start < Duration::from_secs(6));
    assert!(events
        .iter()
        .any(|e| e.stage == "extract" && e.status == EventStatus::Error));
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(events.last().unwrap().error_kind(), Some("cancelled"));
    assert_eq!(evidence.in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_stalled_verify() {
    let mut config = test_config();
    config.verification.search_timeout_secs = 600;
    // Extract's search answers; the first verification search stalls.
    let evidence = HungEvidence::new(1);
    let orch = orchestrator_with_evidence(config, contradicting_agents(), evidence.clone());
    let bus = EventBus::new().shared();
    let stream = bus.events().unwrap().detach();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let outcome = orch
        .execute(
            Query::new("Why did unemployment rise since 2022, and what should the Fed do about inflation?"),
            bus,
            cancel,
        )
        .await;
    let events: Vec<WorkflowEvent> = stream.collect().await;

    assert!(matches!(outcome.error, Some(WorkflowError::Cancelled)));
    assert_eq!(outcome.path().last(), Some(&WorkflowStage::Error));
    assert!(events
        .iter()
        .any(|e| e.stage == "verify" && e.status == EventStatus::Error));
    assert!(outcome.synthesis().is_none());
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(evidence.started.load(Ordering::SeqCst), 2);
    assert_eq!(evidence.in_flight.load(Ordering::SeqCst), 0);
}

// ── Failure and cancellation ───────────────────────────────────────

#[tokio::test]
async fn test_empty_query_ends_with_classification_error() {
    let orch = orchestrator(test_config(), vec![]);
    let events: Vec<WorkflowEvent> = orch.run_workflow("   ").collect().await;

    assert_eq!(terminal_count(&events), 1);
    let last = events.last().unwrap();
    assert_eq!(last.stage, STAGE_ERROR);
    assert_eq!(last.error_kind(), Some("classification"));
}

#[tokio::test]
async fn test_precancelled_run_still_terminates() {
    let orch = orchestrator(test_config(), contradicting_agents());
    let cancel = CancellationToken::new();
    cancel.cancel();
    let events: Vec<WorkflowEvent> = orch
        .run_workflow_with_cancel("Why did unemployment rise?", cancel)
        .collect()
        .await;

    assert_eq!(terminal_count(&events), 1);
    assert_eq!(events.last().unwrap().error_kind(), Some("cancelled"));
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_agents_leaves_no_pending_task() {
    let orch = orchestrator(
        test_config(),
        vec![
            TestAgent::claims("labor", &["Unemployment is 4.1%"], 0.8),
            TestAgent::hang("silent"),
        ],
    );
    let bus = EventBus::new().shared();
    let stream = bus.events().unwrap().detach();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let outcome = orch
        .execute(Query::new("How has unemployment trended since 2020?"), bus, cancel)
        .await;
    let events: Vec<WorkflowEvent> = stream.collect().await;

    assert!(matches!(outcome.error, Some(WorkflowError::Cancelled)));
    assert!(outcome.state.tasks().iter().all(|t| t.status.is_terminal()));
    let silent = outcome
        .state
        .tasks()
        .iter()
        .find(|t| t.agent_name == "silent")
        .unwrap();
    assert_eq!(silent.failure.as_ref().unwrap().kind, ErrorKind::Cancelled);
    assert_eq!(terminal_count(&events), 1);
    assert_eq!(events.last().unwrap().error_kind(), Some("cancelled"));
}

#[tokio::test(start_paused = true)]
async fn test_dropping_stream_stops_the_run() {
    let mut config = test_config();
    config.verification.search_timeout_secs = 600;
    let evidence = HungEvidence::new(0);
    let orch = orchestrator_with_evidence(config, contradicting_agents(), evidence.clone());
    let cancel = CancellationToken::new();

    let mut stream = orch.run_workflow_with_cancel("What is the unemployment rate?", cancel.clone());
    while let Some(event) = stream.next().await {
        if event.stage == "extract" && event.status == EventStatus::Running {
            break;
        }
    }
    while evidence.in_flight.load(Ordering::SeqCst) == 0 {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    drop(stream);
    drop(orch);
    assert!(cancel.is_cancelled());

    // The spawned run lets go of its collaborators once it has stopped.
    let deadline = Instant::now() + Duration::from_secs(1);
    while Arc::strong_count(&evidence) > 1 {
        assert!(Instant::now() < deadline, "run still holds the evidence index");
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(evidence.in_flight.load(Ordering::SeqCst), 0);
    assert_eq!(evidence.started.load(Ordering::SeqCst), 1);
}
