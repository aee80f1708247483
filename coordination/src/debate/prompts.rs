//! Debate prompt templates.
//!
//! Every prompt opens with the original question and the disputed topic so
//! that no turn is generated without them.

use crate::state::types::{Contradiction, OpposingClaim};

fn header(query: &str, topic: &str) -> String {
    format!("Original question: {query}\nTopic under dispute: {topic}\n")
}

fn positions(contradiction: &Contradiction) -> String {
    contradiction
        .opposing
        .iter()
        .map(|p| format!("- {}: {} (confidence {:.2})", p.agent_name, p.claim.text, p.confidence))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Openings are independent: each participant sees only its own claim.
pub fn opening(query: &str, contradiction: &Contradiction, own: &OpposingClaim) -> String {
    format!(
        "{}\nYou are {}. State your position and the evidence behind it.\n\
         Your claim: {} (confidence {:.2})",
        header(query, &contradiction.topic),
        own.agent_name,
        own.claim.text,
        own.confidence
    )
}

pub fn challenge(query: &str, contradiction: &Contradiction, speaker: &str) -> String {
    format!(
        "{}\nYou are {speaker}. Identify the weakest point in the other positions on \
         \"{}\" and explain why.\n\nPositions:\n{}",
        header(query, &contradiction.topic),
        contradiction.topic,
        positions(contradiction)
    )
}

pub fn edge_case(query: &str, contradiction: &Contradiction, speaker: &str) -> String {
    format!(
        "{}\nYou are {speaker}. Name a condition (period, definition, revision or data \
         source) under which your position on \"{}\" would not hold.",
        header(query, &contradiction.topic),
        contradiction.topic
    )
}

pub fn risk(query: &str, contradiction: &Contradiction, speaker: &str) -> String {
    format!(
        "{}\nYou are {speaker}. Describe the downside if the user acts on the wrong \
         figure for \"{}\".",
        header(query, &contradiction.topic),
        contradiction.topic
    )
}

pub fn propose(query: &str, contradiction: &Contradiction) -> String {
    format!(
        "{}\nAs moderator, propose one reconciled statement on \"{}\" that every \
         participant could accept, given the debate so far.\n\nPositions:\n{}",
        header(query, &contradiction.topic),
        contradiction.topic,
        positions(contradiction)
    )
}

pub fn vote(query: &str, topic: &str, speaker: &str, proposal: &str) -> String {
    format!(
        "{}\nYou are {speaker}. The moderator proposes:\n{proposal}\n\n\
         Reply with AGREE or DISAGREE on the first line, then one sentence of reasoning.",
        header(query, topic)
    )
}

pub fn synthesis(query: &str, contradiction: &Contradiction, agreed: bool) -> String {
    let instruction = if agreed {
        "All participants agreed. Write the resolution in two or three sentences."
    } else {
        "Participants did not all agree. Summarize the remaining disagreement in two or \
         three sentences without choosing a side."
    };
    format!(
        "{}\nAs moderator: {instruction}\n\nPositions:\n{}",
        header(query, &contradiction.topic),
        positions(contradiction)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::Claim;

    fn contradiction() -> Contradiction {
        Contradiction {
            topic: "unemployment".into(),
            opposing: vec![
                OpposingClaim {
                    agent_name: "labor".into(),
                    claim: Claim::new("Unemployment is 3.2%"),
                    confidence: 0.7,
                },
                OpposingClaim {
                    agent_name: "macro".into(),
                    claim: Claim::new("Unemployment is 4.1%"),
                    confidence: 0.8,
                },
            ],
        }
    }

    #[test]
    fn test_every_prompt_is_anchored() {
        let q = "What is the unemployment rate?";
        let c = contradiction();
        let prompts = [
            opening(q, &c, &c.opposing[0]),
            challenge(q, &c, "labor"),
            edge_case(q, &c, "labor"),
            risk(q, &c, "macro"),
            propose(q, &c),
            vote(q, &c.topic, "labor", "Unemployment is about 4%"),
            synthesis(q, &c, true),
            synthesis(q, &c, false),
        ];
        for p in prompts {
            assert!(p.starts_with("Original question: What is the unemployment rate?\nTopic under dispute: unemployment"));
        }
    }

    #[test]
    fn test_opening_carries_only_own_claim() {
        let c = contradiction();
        let p = opening("q", &c, &c.opposing[0]);
        assert!(p.contains("You are labor."));
        assert!(p.contains("Your claim: Unemployment is 3.2% (confidence 0.70)"));
        assert!(!p.contains("4.1%"));
        assert!(!p.contains("macro"));

        let p = opening("q", &c, &c.opposing[1]);
        assert!(p.contains("Unemployment is 4.1%"));
        assert!(!p.contains("3.2%"));
    }

    #[test]
    fn test_positions_listed() {
        let c = contradiction();
        let p = propose("q", &c);
        assert!(p.contains("- labor: Unemployment is 3.2% (confidence 0.70)"));
        assert!(p.contains("- macro: Unemployment is 4.1%"));
    }
}
