//! Query classifier: complexity tier, capability tags and route.
//!
//! Pure pattern matching over the query text: no I/O, no randomness, so
//! classifying the same query twice yields the same [`Classification`].

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::LazyLock;
use thiserror::Error;

use crate::config::ClassifierConfig;
use crate::state::types::{CapabilityTag, Classification, Complexity, Route};

/// Rejection of a query before any work starts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ClassifyError {
    #[error("query is empty")]
    Empty,

    #[error("query is {len} characters, limit is {max}")]
    TooLong { len: usize, max: usize },
}

static TEMPORAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(trend\w*|histor\w*|since|over the (?:last|past)|forecast\w*|project\w*|outlook|next (?:year|quarter|month)|(?:19|20)\d{2}|q[1-4])\b",
    )
    .expect("TEMPORAL_RE regex should compile")
});

static SCENARIO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(what if|if|scenario\w*|hypothetical\w*|suppose|simulat\w*|shock\w*)\b")
        .expect("SCENARIO_RE regex should compile")
});

static ANALYTICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(why|cause\w*|driv\w*|impact\w*|effect\w*|compar\w*|versus|vs|correlat\w*|relationship|explain\w*)\b",
    )
    .expect("ANALYTICAL_RE regex should compile")
});

static STRATEGIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(should|recommend\w*|strateg\w*|policy|policies|best way|plan|invest\w*|allocat\w*|hedge)\b",
    )
    .expect("STRATEGIC_RE regex should compile")
});

static ALERTING_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(risk\w*|warn\w*|alert\w*|threshold\w*|recession\w*|crisis|danger\w*|signal\w*|downturn)\b",
    )
    .expect("ALERTING_RE regex should compile")
});

static CRITICAL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(systemic|collapse|contagion|emergency|default|crash|panic)\b")
        .expect("CRITICAL_RE regex should compile")
});

/// Word count above which a query earns an extra complexity point.
const LONG_QUERY_WORDS: usize = 25;

/// Maps query text to a [`Classification`].
pub struct Classifier {
    config: ClassifierConfig,
}

impl Classifier {
    pub fn new(config: ClassifierConfig) -> Self {
        Self { config }
    }

    pub fn classify(&self, query: &str) -> Result<Classification, ClassifyError> {
        let text = query.trim();
        if text.is_empty() {
            return Err(ClassifyError::Empty);
        }
        let len = text.chars().count();
        if len > self.config.max_query_chars {
            return Err(ClassifyError::TooLong {
                len,
                max: self.config.max_query_chars,
            });
        }

        // ── Capability tags ─────────────────────────────────────────────
        let patterns: [(&Regex, CapabilityTag); 5] = [
            (&TEMPORAL_RE, CapabilityTag::Temporal),
            (&SCENARIO_RE, CapabilityTag::Scenario),
            (&ANALYTICAL_RE, CapabilityTag::Analytical),
            (&STRATEGIC_RE, CapabilityTag::Strategic),
            (&ALERTING_RE, CapabilityTag::Alerting),
        ];
        let mut tags = BTreeSet::new();
        let mut signals = Vec::new();
        for (re, tag) in patterns {
            if let Some(m) = re.find(text) {
                tags.insert(tag);
                signals.push(format!("{}:{}", tag, m.as_str().to_lowercase()));
            }
        }

        // ── Complexity scoring ──────────────────────────────────────────
        let words = text.split_whitespace().count();
        let questions = text.matches('?').count();
        let mut score = tags.len();
        if words > LONG_QUERY_WORDS {
            score += 1;
            signals.push(format!("length:{}", words));
        }
        if questions > 1 {
            score += 1;
            signals.push(format!("questions:{}", questions));
        }
        let critical_hit = CRITICAL_RE.find(text);
        if let Some(m) = critical_hit {
            signals.push(format!("critical:{}", m.as_str().to_lowercase()));
        }

        let complexity = match (score, critical_hit.is_some()) {
            (0, false) => Complexity::Simple,
            (s, true) if s >= 2 => Complexity::Critical,
            (1..=2, _) | (0, true) => Complexity::Medium,
            _ => Complexity::Complex,
        };
        let route = if complexity == Complexity::Simple {
            Route::Fast
        } else {
            Route::Full
        };

        Ok(Classification {
            complexity,
            tags: tags.into_iter().collect(),
            route,
            debate_turn_budget: self.config.budgets.for_complexity(complexity),
            signals,
        })
    }
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(ClassifierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_question_is_simple_fast_path() {
        let c = Classifier::default()
            .classify("What is the unemployment rate?")
            .unwrap();
        assert_eq!(c.complexity, Complexity::Simple);
        assert_eq!(c.route, Route::Fast);
        assert!(c.tags.is_empty());
        assert_eq!(c.debate_turn_budget, 0);
    }

    #[test]
    fn test_single_capability_is_medium() {
        let c = Classifier::default()
            .classify("How has unemployment trended since 2020?")
            .unwrap();
        assert_eq!(c.complexity, Complexity::Medium);
        assert_eq!(c.route, Route::Full);
        assert_eq!(c.tags, vec![CapabilityTag::Temporal]);
        assert_eq!(c.debate_turn_budget, 12);
    }

    #[test]
    fn test_multi_capability_is_complex() {
        let c = Classifier::default()
            .classify("Why did unemployment rise since 2022, and what should the Fed do about inflation?")
            .unwrap();
        assert_eq!(c.complexity, Complexity::Complex);
        assert!(c.has_tag(CapabilityTag::Analytical));
        assert!(c.has_tag(CapabilityTag::Temporal));
        assert!(c.has_tag(CapabilityTag::Strategic));
        assert!(c.debate_turn_budget >= 40);
    }

    #[test]
    fn test_critical_keywords_escalate() {
        let c = Classifier::default()
            .classify("What is the risk of systemic bank contagion if rates stay high?")
            .unwrap();
        assert_eq!(c.complexity, Complexity::Critical);
        assert_eq!(c.debate_turn_budget, 60);
        assert!(c.signals.iter().any(|s| s.starts_with("critical:")));
    }

    #[test]
    fn test_rejects_empty_and_oversize() {
        let classifier = Classifier::new(ClassifierConfig {
            max_query_chars: 10,
            ..ClassifierConfig::default()
        });
        assert_eq!(classifier.classify("   "), Err(ClassifyError::Empty));
        assert_eq!(
            classifier.classify("this query is too long"),
            Err(ClassifyError::TooLong { len: 22, max: 10 })
        );
    }

    #[test]
    fn test_classify_is_idempotent() {
        let classifier = Classifier::default();
        for q in [
            "What is the unemployment rate?",
            "Compare housing starts versus permits over the last 5 years",
            "Should we hedge against a recession? What if oil prices spike?",
        ] {
            assert_eq!(classifier.classify(q).unwrap(), classifier.classify(q).unwrap());
        }
    }

    #[test]
    fn test_tags_sorted_and_unique() {
        let c = Classifier::default()
            .classify("Risk warning: what if a recession hits and the trend reverses?")
            .unwrap();
        let mut sorted = c.tags.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(c.tags, sorted);
        assert!(c.summary().contains("route=full"));
    }
}
