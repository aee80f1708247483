//! Agent runner: bounded-concurrency execution of analysis agents.
//!
//! Each agent call is wrapped with:
//!
//! 1. a rate-limit permit on the agent's dependency,
//! 2. a hard per-call timeout,
//! 3. bounded retry with exponential backoff for transient failures,
//! 4. exactly one terminal event (`complete` or `error`) on `agent:<name>`.
//!
//! A group runs under a wall-clock ceiling and a cancellation token. When
//! either fires, every task that has not finished is forced to `error` and
//! given its terminal event, so no task is ever left pending.

use chrono::{DateTime, Utc};
use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{normalize_agent_name, AgentRegistry, AnalysisAgent};
use crate::config::RunnerConfig;
use crate::error::AgentError;
use crate::events::{agent_stage, EventStatus, SharedEventBus};
use crate::rate_limit::RateLimiterSet;
use crate::resilience::retry_with_backoff;
use crate::state::types::{AgentContext, AgentTask, Query, TaskStatus};

/// Runs agents for one workflow run.
pub struct AgentRunner {
    config: RunnerConfig,
    limiters: Arc<RateLimiterSet>,
    bus: SharedEventBus,
}

impl AgentRunner {
    pub fn new(config: RunnerConfig, limiters: Arc<RateLimiterSet>, bus: SharedEventBus) -> Self {
        Self {
            config,
            limiters,
            bus,
        }
    }

    /// Run one agent to a terminal task status.
    pub async fn run(
        &self,
        agent: &dyn AnalysisAgent,
        query: &Query,
        context: &AgentContext,
    ) -> AgentTask {
        self.run_tracked(agent, query, context, |_| {}).await
    }

    /// `run`, reporting the start time to `on_start` before the first call.
    async fn run_tracked<F>(
        &self,
        agent: &dyn AnalysisAgent,
        query: &Query,
        context: &AgentContext,
        on_start: F,
    ) -> AgentTask
    where
        F: FnOnce(DateTime<Utc>) + Send,
    {
        let name = normalize_agent_name(agent.name());
        let stage = agent_stage(&name);
        let mut task = AgentTask::new(&name);
        task.start();
        if let Some(at) = task.started_at {
            on_start(at);
        }
        self.bus.emit(
            &stage,
            EventStatus::Running,
            json!({ "agent": name, "dependency": agent.dependency() }),
            None,
        );

        let started = Instant::now();
        let limiter = self.limiters.limiter(agent.dependency());
        let timeout = self.config.agent_timeout();
        let policy = self.config.retry_policy();
        let agent_name = name.as_str();

        let (result, attempts) =
            retry_with_backoff(&policy, Some(limiter.as_ref()), agent_name, |attempt| async move {
                debug!(agent = agent_name, attempt, "Invoking agent");
                match tokio::time::timeout(timeout, agent.analyze(query, context)).await {
                    Ok(Ok(mut finding)) => {
                        finding.agent_name = agent_name.to_string();
                        finding.validate().map_err(AgentError::Validation)?;
                        Ok(finding)
                    }
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(AgentError::Timeout(timeout.as_secs())),
                }
            })
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        match result {
            Ok(finding) => {
                let claims = finding.claims.len();
                let confidence = finding.confidence;
                task.complete(finding, attempts);
                info!(agent = %name, claims, attempts, latency_ms, "Agent complete");
                self.bus.emit(
                    &stage,
                    EventStatus::Complete,
                    json!({
                        "agent": name,
                        "status": task.status,
                        "claims": claims,
                        "confidence": confidence,
                        "attempts": attempts,
                    }),
                    Some(latency_ms),
                );
            }
            Err(e) => {
                task.fail(&e, attempts);
                warn!(agent = %name, attempts, kind = %e.kind(), error = %e, "Agent failed");
                self.emit_failure(&task, Some(latency_ms));
            }
        }
        task
    }

    /// Run the named agents concurrently, at most `max_concurrency` at a
    /// time, under the group ceiling and `cancel`.
    ///
    /// Names are normalized and de-duplicated first. Unknown names produce an
    /// `error` task. The returned tasks follow the de-duplicated name order
    /// and are all terminal.
    pub async fn run_group<S: AsRef<str>>(
        &self,
        registry: &AgentRegistry,
        names: &[S],
        query: &Query,
        context: &AgentContext,
        cancel: &CancellationToken,
    ) -> Vec<AgentTask> {
        let resolved = registry.resolve(names);
        let mut slots: Vec<Option<AgentTask>> = vec![None; resolved.len()];
        // Start times of admitted agents, kept for tasks forced after a cutoff.
        let started: Mutex<Vec<Option<DateTime<Utc>>>> = Mutex::new(vec![None; resolved.len()]);
        let started_ref = &started;
        let semaphore = Semaphore::new(self.config.max_concurrency.max(1));
        let semaphore = &semaphore;

        info!(
            agents = resolved.len(),
            max_concurrency = self.config.max_concurrency,
            group_timeout_secs = self.config.group_timeout_secs,
            "Starting agent group"
        );

        let mut pending = FuturesUnordered::new();
        for (idx, (name, agent)) in resolved.iter().enumerate() {
            match agent {
                Some(agent) => {
                    let agent = agent.clone();
                    pending.push(async move {
                        // Semaphore is never closed; a failed acquire just runs unbounded.
                        let _permit = semaphore.acquire().await.ok();
                        let task = self
                            .run_tracked(agent.as_ref(), query, context, |at| {
                                if let Ok(mut started) = started_ref.lock() {
                                    started[idx] = Some(at);
                                }
                            })
                            .await;
                        (idx, task)
                    });
                }
                None => {
                    let mut task = AgentTask::new(name);
                    task.start();
                    task.fail(&AgentError::UnknownAgent(name.clone()), 0);
                    warn!(agent = %name, "Unknown agent requested");
                    self.emit_failure(&task, None);
                    slots[idx] = Some(task);
                }
            }
        }

        let deadline = Instant::now() + self.config.group_timeout();
        let mut interrupted: Option<AgentError> = None;
        while !pending.is_empty() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    interrupted = Some(AgentError::Cancelled);
                    break;
                }
                _ = tokio::time::sleep_until(deadline) => {
                    interrupted = Some(AgentError::GroupTimeout(self.config.group_timeout_secs));
                    break;
                }
                next = pending.next() => {
                    if let Some((idx, task)) = next {
                        slots[idx] = Some(task);
                    }
                }
            }
        }
        // Dropping the set aborts every in-flight call.
        drop(pending);

        let started = started.into_inner().unwrap_or_else(|e| e.into_inner());
        let reason = interrupted.unwrap_or(AgentError::Cancelled);
        let mut forced = 0;
        let tasks: Vec<AgentTask> = slots
            .into_iter()
            .zip(resolved.iter())
            .zip(started)
            .map(|((slot, (name, _)), started_at)| match slot {
                Some(task) => task,
                None => {
                    forced += 1;
                    // Agents still queued on the semaphore never started.
                    let mut task = AgentTask::new(name);
                    task.started_at = started_at;
                    task.fail(&reason, 0);
                    self.emit_failure(&task, task.latency_ms());
                    task
                }
            })
            .collect();

        if forced > 0 {
            warn!(forced, reason = %reason, "Agent group interrupted; pending tasks forced to error");
        }
        let complete = tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Complete)
            .count();
        info!(complete, failed = tasks.len() - complete, "Agent group finished");
        tasks
    }

    fn emit_failure(&self, task: &AgentTask, latency_ms: Option<u64>) {
        let (kind, message) = task
            .failure
            .as_ref()
            .map(|f| (f.kind.to_string(), f.message.clone()))
            .unwrap_or_default();
        self.bus.emit(
            agent_stage(&task.agent_name),
            EventStatus::Error,
            json!({
                "agent": task.agent_name,
                "status": task.status,
                "kind": kind,
                "message": message,
                "attempts": task.attempts,
            }),
            latency_ms,
        );
    }
}
