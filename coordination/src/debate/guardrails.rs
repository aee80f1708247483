//! Anchoring guardrails for debate turns.
//!
//! A turn is anchored when it engages the original query or the disputed
//! topic. Empty replies, generic disclaimers and replies sharing no content
//! word with either are drift. The engine re-prompts once with an explicit
//! restatement and then substitutes [`fallback_message`].

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;

use super::state::DebatePhase;
use crate::workflow::extract::content_tokens;

static GENERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(as an ai\b|as a language model|i cannot (?:help|answer|assist)|i can't (?:help|answer|assist)|i'm sorry|i am sorry|without more context|no question (?:was )?provided|please provide (?:more|the) (?:context|question|details)|i don't have (?:access|enough))",
    )
    .expect("GENERIC_RE regex should compile")
});

/// Prefix marking a deterministic stand-in message.
pub const FALLBACK_PREFIX: &str = "[fallback]";

/// Whether `message` is a generic disclaimer rather than an argument.
pub fn is_generic(message: &str) -> bool {
    GENERIC_RE.is_match(message)
}

/// Whether `message` engages the query or the disputed topic.
pub fn is_anchored(message: &str, query: &str, topic: &str) -> bool {
    let message = message.trim();
    if message.is_empty() || is_generic(message) {
        return false;
    }
    let anchors: BTreeSet<String> = content_tokens(query)
        .into_iter()
        .chain(content_tokens(topic))
        .collect();
    if anchors.is_empty() {
        return true;
    }
    content_tokens(message).iter().any(|t| anchors.contains(t))
}

/// `prompt` with an explicit restatement of what must be addressed.
pub fn reanchor_prompt(prompt: &str, query: &str, topic: &str) -> String {
    format!(
        "Your previous reply did not address the question. Stay on it.\n\
         Original question: {query}\n\
         Topic under dispute: {topic}\n\
         Answer with a concrete argument about \"{topic}\".\n\n{prompt}"
    )
}

/// Deterministic turn used when the provider keeps drifting.
pub fn fallback_message(
    speaker: &str,
    phase: DebatePhase,
    query: &str,
    topic: &str,
    position: Option<&str>,
) -> String {
    let stance = position
        .map(|p| format!(" {speaker} maintains its position: {p}"))
        .unwrap_or_default();
    format!(
        "{FALLBACK_PREFIX} {speaker} ({phase}) on \"{topic}\" for the question \"{query}\":{stance}"
    )
}
