//! Consensus round: parse votes on the moderator's proposal and decide.
//!
//! A contradiction is resolved only when every participant casts an
//! explicit `AGREE`. A missing, unparseable or dissenting vote leaves it
//! flagged; the moderator's summary alone never counts as agreement.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

use super::state::ResolutionStatus;

static VOTE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\W*(?:vote\W*)?(agree|disagree)\b").expect("VOTE_RE regex should compile")
});

/// One participant's response to a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Vote {
    Agree,
    Disagree,
    /// No vote on the first line of the reply, or a fallback turn.
    Unparsed,
}

impl std::fmt::Display for Vote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Agree => write!(f, "agree"),
            Self::Disagree => write!(f, "disagree"),
            Self::Unparsed => write!(f, "unparsed"),
        }
    }
}

/// Read the vote from the first non-empty line of `message`.
///
/// Accepts `AGREE`, `Vote: disagree`, `**Agree**` and similar. A vote word
/// further down the reply is reasoning, not a vote.
pub fn parse_vote(message: &str) -> Vote {
    let first = message.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    match VOTE_RE
        .captures(first)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_lowercase())
        .as_deref()
    {
        Some("agree") => Vote::Agree,
        Some("disagree") => Vote::Disagree,
        _ => Vote::Unparsed,
    }
}

/// A recorded vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ballot {
    pub agent: String,
    pub vote: Vote,
    pub message: String,
}

impl Ballot {
    pub fn new(agent: &str, message: &str) -> Self {
        Self {
            agent: agent.to_string(),
            vote: parse_vote(message),
            message: message.to_string(),
        }
    }

    /// A ballot that counts as an abstention whatever `message` says.
    pub fn abstain(agent: &str, message: &str) -> Self {
        Self {
            agent: agent.to_string(),
            vote: Vote::Unparsed,
            message: message.to_string(),
        }
    }
}

/// Result of tallying a consensus round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusOutcome {
    pub status: ResolutionStatus,
    pub agreed: Vec<String>,
    pub dissenting: Vec<String>,
    /// Participants with no ballot or an unparseable one.
    pub abstained: Vec<String>,
}

impl ConsensusOutcome {
    pub fn summary_line(&self) -> String {
        format!(
            "{}: {} agree, {} disagree, {} abstain",
            self.status,
            self.agreed.len(),
            self.dissenting.len(),
            self.abstained.len()
        )
    }
}

/// Tally `ballots` against the full participant list.
pub fn tally(participants: &[String], ballots: &[Ballot]) -> ConsensusOutcome {
    let mut agreed = Vec::new();
    let mut dissenting = Vec::new();
    let mut abstained = Vec::new();

    for agent in participants {
        match ballots.iter().find(|b| &b.agent == agent).map(|b| b.vote) {
            Some(Vote::Agree) => agreed.push(agent.clone()),
            Some(Vote::Disagree) => dissenting.push(agent.clone()),
            Some(Vote::Unparsed) | None => abstained.push(agent.clone()),
        }
    }

    let status = if !participants.is_empty() && agreed.len() == participants.len() {
        ResolutionStatus::Resolved
    } else {
        ResolutionStatus::Flagged
    };

    ConsensusOutcome {
        status,
        agreed,
        dissenting,
        abstained,
    }
}
