//! Debate engine: runs the phase state machine over each contradiction.
//!
//! Every turn is one guarded provider call, checked by the anchoring
//! guardrail, appended to the transcript and streamed as a `debate:turn`
//! event before the next turn starts.

use futures::future::join_all;
use serde_json::json;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::consensus::{parse_vote, tally, Ballot, Vote};
use super::guardrails::{fallback_message, is_anchored, reanchor_prompt};
use super::prompts;
use super::state::{
    DebatePhase, DebateResolution, DebateStateError, DebateTranscript, PhaseBudget,
    ResolutionStatus,
};
use crate::config::DebateConfig;
use crate::events::{EventStatus, SharedEventBus, STAGE_DEBATE_TURN};
use crate::provider::{CallError, GuardedProvider};
use crate::state::types::{Contradiction, Query};

#[derive(Debug, thiserror::Error)]
enum TurnError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error(transparent)]
    State(#[from] DebateStateError),
}

/// What a turn's reply has to contain to be kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Argument,
    Vote,
}

/// A recorded turn's text, and whether the guardrail had to substitute it.
struct Reply {
    message: String,
    fallback: bool,
}

/// Drives structured debates to a `resolved` or `flagged` outcome.
pub struct DebateEngine {
    provider: GuardedProvider,
    config: DebateConfig,
    bus: SharedEventBus,
}

impl DebateEngine {
    pub fn new(provider: GuardedProvider, config: DebateConfig, bus: SharedEventBus) -> Self {
        Self {
            provider,
            config,
            bus,
        }
    }

    /// Debate every contradiction with at most `budget` turns each.
    pub async fn resolve(
        &self,
        query: &Query,
        contradictions: &[Contradiction],
        budget: u32,
        cancel: &CancellationToken,
    ) -> Vec<DebateResolution> {
        if contradictions.is_empty() {
            return Vec::new();
        }
        info!(
            query_id = %query.id,
            contradictions = contradictions.len(),
            budget,
            parallel = self.config.parallel_contradictions,
            "Debate starting"
        );

        if self.config.parallel_contradictions {
            join_all(
                contradictions
                    .iter()
                    .enumerate()
                    .map(|(idx, c)| self.debate_one(idx, query, c, budget, cancel)),
            )
            .await
        } else {
            let mut out = Vec::with_capacity(contradictions.len());
            for (idx, c) in contradictions.iter().enumerate() {
                out.push(self.debate_one(idx, query, c, budget, cancel).await);
            }
            out
        }
    }

    async fn debate_one(
        &self,
        idx: usize,
        query: &Query,
        contradiction: &Contradiction,
        budget: u32,
        cancel: &CancellationToken,
    ) -> DebateResolution {
        let mut transcript = DebateTranscript::new(&query.text, &contradiction.topic, budget);

        if cancel.is_cancelled() {
            return flagged(contradiction, transcript, "debate cancelled before it started");
        }
        if budget == 0 {
            return flagged(contradiction, transcript, "no turn budget");
        }

        match self.run_phases(idx, contradiction, &mut transcript, cancel).await {
            Ok((status, text)) => {
                let _ = transcript.transition(DebatePhase::Terminal, "synthesis written");
                info!(
                    topic = %contradiction.topic,
                    status = %status,
                    turns = transcript.turns_used(),
                    "Debate finished"
                );
                DebateResolution {
                    contradiction: contradiction.clone(),
                    resolution_text: text,
                    status,
                    turns_used: transcript.turns_used(),
                    transcript: transcript.turns().to_vec(),
                    note: None,
                }
            }
            Err(e) => {
                warn!(
                    topic = %contradiction.topic,
                    phase = %transcript.phase(),
                    error = %e,
                    "Debate stopped early"
                );
                let note = format!("debate stopped during {}: {e}", transcript.phase());
                let _ = transcript.transition(DebatePhase::Terminal, &note);
                flagged(contradiction, transcript, &note)
            }
        }
    }

    async fn run_phases(
        &self,
        idx: usize,
        contradiction: &Contradiction,
        transcript: &mut DebateTranscript,
        cancel: &CancellationToken,
    ) -> Result<(ResolutionStatus, String), TurnError> {
        let participants: Vec<String> = contradiction
            .participants()
            .into_iter()
            .map(str::to_string)
            .collect();
        let budget = PhaseBudget::allocate(transcript.budget(), participants.len() as u32);
        let query = transcript.anchored_query().to_string();
        debug!(topic = %contradiction.topic, ?budget, "Phase budget allocated");

        // Opening: own claim only, no history.
        for speaker in participants.iter().cycle().take(budget.opening as usize) {
            let Some(own) = contradiction.position_of(speaker) else {
                continue;
            };
            let prompt = prompts::opening(&query, contradiction, own);
            self.take_turn(idx, transcript, speaker, &prompt, false, Expect::Argument, cancel)
                .await?;
        }

        for phase in [DebatePhase::Challenge, DebatePhase::EdgeCase, DebatePhase::Risk] {
            transcript.transition(phase, "previous phase complete")?;
            let turns = budget.for_phase(phase) as usize;
            for speaker in participants.iter().cycle().take(turns) {
                let prompt = match phase {
                    DebatePhase::Challenge => prompts::challenge(&query, contradiction, speaker),
                    DebatePhase::EdgeCase => prompts::edge_case(&query, contradiction, speaker),
                    _ => prompts::risk(&query, contradiction, speaker),
                };
                self.take_turn(idx, transcript, speaker, &prompt, true, Expect::Argument, cancel)
                    .await?;
            }
        }

        transcript.transition(DebatePhase::Consensus, "stress tests complete")?;
        let moderator = self.config.moderator_name.clone();
        let status = if budget.consensus > 0 {
            let proposal = self
                .take_turn(
                    idx,
                    transcript,
                    &moderator,
                    &prompts::propose(&query, contradiction),
                    true,
                    Expect::Argument,
                    cancel,
                )
                .await?
                .message;
            let mut ballots = Vec::with_capacity(participants.len());
            for speaker in &participants {
                let prompt = prompts::vote(&query, &contradiction.topic, speaker, &proposal);
                let reply = self
                    .take_turn(idx, transcript, speaker, &prompt, true, Expect::Vote, cancel)
                    .await?;
                // A substituted vote turn never counts, whatever it quotes.
                ballots.push(if reply.fallback {
                    Ballot::abstain(speaker, &reply.message)
                } else {
                    Ballot::new(speaker, &reply.message)
                });
            }
            let outcome = tally(&participants, &ballots);
            debug!(topic = %contradiction.topic, outcome = %outcome.summary_line(), "Votes tallied");
            outcome.status
        } else {
            ResolutionStatus::Flagged
        };

        transcript.transition(DebatePhase::Synthesis, "consensus round complete")?;
        let agreed = status == ResolutionStatus::Resolved;
        let text = if budget.synthesis > 0 {
            self.take_turn(
                idx,
                transcript,
                &moderator,
                &prompts::synthesis(&query, contradiction, agreed),
                true,
                Expect::Argument,
                cancel,
            )
            .await?
            .message
        } else {
            positions_summary(contradiction)
        };
        Ok((status, text))
    }

    /// One provider turn with a single re-anchor retry, then a fallback.
    #[allow(clippy::too_many_arguments)]
    async fn take_turn(
        &self,
        idx: usize,
        transcript: &mut DebateTranscript,
        speaker: &str,
        prompt: &str,
        with_history: bool,
        expect: Expect,
        cancel: &CancellationToken,
    ) -> Result<Reply, TurnError> {
        if transcript.remaining() == 0 {
            return Err(DebateStateError::BudgetExhausted(transcript.budget()).into());
        }
        let started = Instant::now();
        let history = if with_history {
            transcript.history()
        } else {
            Vec::new()
        };
        let query = transcript.anchored_query().to_string();
        let topic = transcript.topic().to_string();
        let label = format!("debate:{}:{speaker}", transcript.phase());
        let accept = |reply: &str| match expect {
            Expect::Vote => parse_vote(reply) != Vote::Unparsed,
            Expect::Argument => is_anchored(reply, &query, &topic),
        };

        let mut reply = self.provider.complete(&label, prompt, &history, cancel).await?;
        let mut fallback = false;
        if !accept(&reply) {
            debug!(speaker, phase = %transcript.phase(), "Turn drifted, re-anchoring");
            let retry = reanchor_prompt(prompt, &query, &topic);
            reply = self.provider.complete(&label, &retry, &history, cancel).await?;
            if !accept(&reply) {
                warn!(speaker, phase = %transcript.phase(), "Turn drifted twice, using fallback");
                let position = transcript
                    .last_from(speaker)
                    .filter(|t| !t.fallback)
                    .map(|t| t.message.clone());
                reply = fallback_message(
                    speaker,
                    transcript.phase(),
                    &query,
                    &topic,
                    position.as_deref(),
                );
                fallback = true;
            }
        }

        let turn = transcript.push(speaker, reply, fallback)?;
        self.bus.emit(
            STAGE_DEBATE_TURN,
            EventStatus::Streaming,
            json!({
                "contradiction": idx,
                "topic": topic,
                "turn_no": turn.turn_no,
                "speaker": turn.speaker,
                "phase": turn.phase,
                "message": turn.message,
                "fallback": turn.fallback,
            }),
            Some(started.elapsed().as_millis() as u64),
        );
        Ok(Reply {
            message: turn.message.clone(),
            fallback: turn.fallback,
        })
    }
}

fn positions_summary(contradiction: &Contradiction) -> String {
    let positions: Vec<String> = contradiction
        .opposing
        .iter()
        .map(|p| format!("{} holds \"{}\" ({:.2})", p.agent_name, p.claim.text, p.confidence))
        .collect();
    format!(
        "Unresolved disagreement on {}: {}",
        contradiction.topic,
        positions.join("; ")
    )
}

fn flagged(contradiction: &Contradiction, transcript: DebateTranscript, note: &str) -> DebateResolution {
    DebateResolution {
        contradiction: contradiction.clone(),
        resolution_text: positions_summary(contradiction),
        status: ResolutionStatus::Flagged,
        turns_used: transcript.turns_used(),
        transcript: transcript.turns().to_vec(),
        note: Some(note.to_string()),
    }
}
