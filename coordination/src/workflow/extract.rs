//! Extract stage: builds the shared [`AgentContext`] for a query.
//!
//! Also home of the text helpers the other stages use to compare claims:
//! content tokens, time periods and numbers.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{WorkflowError, WorkflowResult};
use crate::state::types::{AgentContext, Classification, Query};
use crate::verifier::{GuardedEvidence, LookupError};

static WORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[A-Za-z][A-Za-z'\-]*").expect("WORD_RE regex should compile"));

static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-?\d{1,3}(?:,\d{3})+(?:\.\d+)?|-?\d+(?:\.\d+)?").expect("NUMBER_RE regex should compile")
});

static PERIOD_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b((?:19|20)\d{2}|q[1-4]|jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|jun(?:e)?|jul(?:y)?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?)\b",
    )
    .expect("PERIOD_RE regex should compile")
});

const STOPWORDS: &[&str] = &[
    "a", "about", "above", "after", "again", "all", "also", "am", "an", "and", "any", "are", "as",
    "at", "be", "been", "being", "below", "between", "both", "but", "by", "can", "could", "did",
    "do", "does", "doing", "during", "each", "for", "from", "had", "has", "have", "having", "how",
    "i", "if", "in", "into", "is", "it", "its", "just", "last", "may", "me", "more", "most", "my",
    "no", "not", "now", "of", "on", "only", "or", "other", "our", "over", "per", "percent",
    "same", "should", "so", "some", "such", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "through", "to", "under", "until", "very", "was",
    "we", "were", "what", "when", "where", "which", "while", "who", "why", "will", "with",
    "would", "you", "your", "currently", "current", "level", "stands", "remains", "around",
    "roughly", "approximately", "expected", "likely",
];

/// Directional words, excluded from topic tokens.
pub const UP_WORDS: &[&str] = &[
    "rise", "rises", "rising", "rose", "risen", "increase", "increased", "increases",
    "increasing", "grow", "grows", "growing", "grew", "growth", "up", "higher", "climb",
    "climbed", "climbing", "expand", "expanded", "expanding", "accelerate", "accelerating",
    "improve", "improved", "improving", "strengthen", "strengthening",
];

pub const DOWN_WORDS: &[&str] = &[
    "fall", "falls", "falling", "fell", "fallen", "decline", "declined", "declines",
    "declining", "decrease", "decreased", "decreasing", "drop", "dropped", "dropping", "down",
    "lower", "shrink", "shrinking", "shrank", "contract", "contracted", "contracting", "slow",
    "slowed", "slowing", "weaken", "weakened", "weakening", "deteriorate", "deteriorating",
];

/// Lowercase content words of `text`: no stopwords, numbers, periods or
/// directional words, in order of first appearance.
pub fn content_tokens(text: &str) -> Vec<String> {
    let mut seen = BTreeSet::new();
    WORD_RE
        .find_iter(text)
        .map(|m| m.as_str().trim_matches(|c| c == '\'' || c == '-').to_lowercase())
        .filter(|w| w.len() > 1)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .filter(|w| !UP_WORDS.contains(&w.as_str()) && !DOWN_WORDS.contains(&w.as_str()))
        .filter(|w| !is_period_word(w))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Time periods mentioned in `text`: years, quarters and month names,
/// lowercased with months reduced to three letters.
pub fn periods(text: &str) -> BTreeSet<String> {
    PERIOD_RE
        .find_iter(text)
        .map(|m| {
            let p = m.as_str().to_lowercase();
            if p.starts_with(|c: char| c.is_ascii_alphabetic()) && !p.starts_with('q') {
                p[..3].to_string()
            } else {
                p
            }
        })
        .collect()
}

fn is_period_word(word: &str) -> bool {
    PERIOD_RE
        .find(word)
        .map(|m| m.start() == 0 && m.end() == word.len())
        .unwrap_or(false)
}

/// Every number in `text`, skipping bare years.
pub fn numbers(text: &str) -> Vec<f64> {
    NUMBER_RE
        .find_iter(text)
        .filter_map(|m| {
            let raw = m.as_str();
            let is_year = raw.len() == 4
                && (raw.starts_with("19") || raw.starts_with("20"))
                && raw.chars().all(|c| c.is_ascii_digit());
            if is_year {
                return None;
            }
            raw.replace(',', "").parse::<f64>().ok()
        })
        .collect()
}

/// First non-year number in `text`.
pub fn first_number(text: &str) -> Option<f64> {
    numbers(text).into_iter().next()
}

/// Relative difference of `a` and `b`, 0 when both are zero.
pub fn relative_difference(a: f64, b: f64) -> f64 {
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        0.0
    } else {
        (a - b).abs() / scale
    }
}

/// Build the shared agent context: keywords, periods and query-level
/// evidence. A failed or timed-out search leaves `facts` empty; only
/// cancellation is an error.
pub async fn extract(
    query: &Query,
    classification: &Classification,
    evidence: &GuardedEvidence,
    top_k: usize,
    cancel: &CancellationToken,
) -> WorkflowResult<AgentContext> {
    let keywords = content_tokens(&query.text);
    let periods: Vec<String> = periods(&query.text).into_iter().collect();

    let facts = match evidence.search(&query.text, top_k, cancel).await {
        Ok(facts) => facts,
        Err(LookupError::Cancelled) => return Err(WorkflowError::Cancelled),
        Err(LookupError::Search(e)) => {
            warn!(query_id = %query.id, error = %e, "Evidence lookup failed during extract");
            Vec::new()
        }
    };
    debug!(
        query_id = %query.id,
        keywords = keywords.len(),
        periods = periods.len(),
        facts = facts.len(),
        "Context extracted"
    );

    Ok(AgentContext {
        query_id: query.id,
        tags: classification.tags.clone(),
        keywords,
        periods,
        facts,
    })
}
