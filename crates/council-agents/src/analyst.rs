//! Prompt-backed analysts.
//!
//! Each [`AnalystKind`] is a named domain expert with a fixed capability set.
//! [`PromptedAnalyst`] asks the completion provider for line-oriented claims
//! and parses them into a [`Finding`]:
//!
//! ```text
//! CLAIM: Unemployment was 3.9% in March 2024 | value: 3.9 | source: bls
//! CONFIDENCE: 0.8
//! ```

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tracing::debug;

use coordination::agents::normalize_agent_name;
use coordination::provider::complete_with_timeout;
use coordination::{
    AgentContext, AgentError, AgentRegistry, AnalysisAgent, CapabilityTag, Claim,
    CompletionProvider, Finding, ProviderError, Query,
};

static CLAIM_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*]\s*)?claim\s*:\s*(.+?)\s*$").expect("CLAIM_RE regex should compile")
});

static CONFIDENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?im)^\s*(?:[-*]\s*)?confidence\s*:\s*([0-9]*\.?[0-9]+)")
        .expect("CONFIDENCE_RE regex should compile")
});

/// Confidence assumed when the reply omits a `CONFIDENCE:` line.
const DEFAULT_CONFIDENCE: f64 = 0.5;
const MAX_CLAIMS: usize = 5;

/// The analysts the council knows how to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnalystKind {
    Labor,
    Inflation,
    Housing,
    FedPolicy,
    Markets,
    Risk,
}

impl AnalystKind {
    pub const ALL: [AnalystKind; 6] = [
        Self::Labor,
        Self::Inflation,
        Self::Housing,
        Self::FedPolicy,
        Self::Markets,
        Self::Risk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Labor => "labor",
            Self::Inflation => "inflation",
            Self::Housing => "housing",
            Self::FedPolicy => "fed_policy",
            Self::Markets => "markets",
            Self::Risk => "risk",
        }
    }

    /// Lookup by normalized name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = normalize_agent_name(name);
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn capabilities(self) -> &'static [CapabilityTag] {
        use CapabilityTag::*;
        match self {
            Self::Labor => &[Temporal, Analytical],
            Self::Inflation => &[Temporal, Analytical],
            Self::Housing => &[Scenario, Analytical],
            Self::FedPolicy => &[Strategic, Scenario],
            Self::Markets => &[Temporal, Alerting],
            Self::Risk => &[Alerting, Scenario, Strategic],
        }
    }

    fn focus(self) -> &'static str {
        match self {
            Self::Labor => "You cover employment, unemployment, payrolls, wages and participation.",
            Self::Inflation => "You cover consumer and producer prices, inflation expectations and core measures.",
            Self::Housing => "You cover home prices, starts, sales, rents and mortgage rates.",
            Self::FedPolicy => "You cover the policy rate, the balance sheet and central bank guidance.",
            Self::Markets => "You cover equities, bond yields, spreads and market-implied expectations.",
            Self::Risk => "You cover recession signals, thresholds and downside scenarios.",
        }
    }
}

impl std::fmt::Display for AnalystKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// An [`AnalysisAgent`] answering through a completion provider.
pub struct PromptedAnalyst {
    kind: AnalystKind,
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
}

impl PromptedAnalyst {
    pub fn new(kind: AnalystKind, provider: Arc<dyn CompletionProvider>, timeout: Duration) -> Self {
        Self {
            kind,
            provider,
            timeout,
        }
    }

    pub fn kind(&self) -> AnalystKind {
        self.kind
    }

    fn prompt(&self, query: &Query, context: &AgentContext) -> String {
        let mut prompt = format!(
            "You are the {} analyst on an economic council. {}\n\nQuestion: {}\n",
            self.kind,
            self.kind.focus(),
            query.text
        );
        if !context.keywords.is_empty() {
            prompt.push_str(&format!("Key terms: {}\n", context.keywords.join(", ")));
        }
        if !context.periods.is_empty() {
            prompt.push_str(&format!("Periods: {}\n", context.periods.join(", ")));
        }
        if !context.facts.is_empty() {
            prompt.push_str("Known facts:\n");
            for fact in &context.facts {
                prompt.push_str(&format!("- [{}] {}\n", fact.source, fact.text));
            }
        }
        prompt.push_str(&format!(
            "\nRespond with at most {MAX_CLAIMS} lines of the form\n\
             CLAIM: <one assertion> | value: <number or none> | source: <citation or none>\n\
             then one line CONFIDENCE: <0.0 to 1.0>."
        ));
        prompt
    }
}

#[async_trait]
impl AnalysisAgent for PromptedAnalyst {
    fn name(&self) -> &str {
        self.kind.name()
    }

    fn dependency(&self) -> &str {
        self.provider.resource()
    }

    fn capabilities(&self) -> &[CapabilityTag] {
        self.kind.capabilities()
    }

    async fn analyze(&self, query: &Query, context: &AgentContext) -> Result<Finding, AgentError> {
        let prompt = self.prompt(query, context);
        let reply = complete_with_timeout(self.provider.as_ref(), &prompt, &[], self.timeout)
            .await
            .map_err(agent_error)?;
        let finding = parse_finding(self.kind.name(), &reply)?;
        debug!(
            agent = self.kind.name(),
            claims = finding.claims.len(),
            confidence = finding.confidence,
            "Analyst reply parsed"
        );
        Ok(finding)
    }
}

/// Map a provider failure onto the agent error taxonomy.
pub fn agent_error(e: ProviderError) -> AgentError {
    match e {
        ProviderError::Timeout(secs) => AgentError::Timeout(secs),
        ProviderError::Connection(msg) => AgentError::Connection(msg),
        ProviderError::RateLimited { retry_after } => AgentError::RateLimited { retry_after },
        ProviderError::InvalidResponse(msg) => AgentError::Validation(msg),
        ProviderError::Provider(msg) => AgentError::Failed(msg),
    }
}

/// Parse `CLAIM:` and `CONFIDENCE:` lines into a finding for `agent`.
pub fn parse_finding(agent: &str, reply: &str) -> Result<Finding, AgentError> {
    let claims: Vec<Claim> = CLAIM_RE
        .captures_iter(reply)
        .filter_map(|c| parse_claim(&c[1]))
        .take(MAX_CLAIMS)
        .collect();
    if claims.is_empty() {
        return Err(AgentError::Validation(format!(
            "{agent} reply had no CLAIM lines"
        )));
    }
    let confidence = CONFIDENCE_RE
        .captures(reply)
        .and_then(|c| c[1].parse::<f64>().ok())
        .unwrap_or(DEFAULT_CONFIDENCE)
        .clamp(0.0, 1.0);
    Ok(Finding::new(agent, claims, confidence))
}

fn parse_claim(line: &str) -> Option<Claim> {
    let mut parts = line.split('|').map(str::trim);
    let text = parts.next().filter(|t| !t.is_empty())?;
    let mut claim = Claim::new(text);
    for field in parts {
        let Some((key, value)) = field.split_once(':') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() || value.eq_ignore_ascii_case("none") {
            continue;
        }
        match key.trim().to_ascii_lowercase().as_str() {
            "value" => {
                if let Ok(v) = value.trim_end_matches('%').parse::<f64>() {
                    claim = claim.with_value(v);
                }
            }
            "source" => claim = claim.with_citation(value),
            "topic" => claim = claim.with_topic(value),
            _ => {}
        }
    }
    Some(claim)
}

/// Registry holding one [`PromptedAnalyst`] per configured name.
pub fn build_registry(
    names: &[String],
    provider: Arc<dyn CompletionProvider>,
    timeout: Duration,
) -> Result<AgentRegistry> {
    let mut registry = AgentRegistry::new();
    for name in names {
        let kind = AnalystKind::from_name(name).with_context(|| format!("unknown analyst {name:?}"))?;
        registry.register(Arc::new(PromptedAnalyst::new(kind, provider.clone(), timeout)));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_finding_reads_fields() {
        let reply = "Here is my view.\n\
                     CLAIM: Unemployment was 3.9% in March 2024 | value: 3.9% | source: bls\n\
                     - claim: Payroll growth slowed | value: none | source: none\n\
                     CONFIDENCE: 0.8";
        let finding = parse_finding("labor", reply).unwrap();
        assert_eq!(finding.agent_name, "labor");
        assert_eq!(finding.claims.len(), 2);
        assert_eq!(finding.claims[0].value, Some(3.9));
        assert_eq!(finding.claims[0].citation.as_deref(), Some("bls"));
        assert_eq!(finding.claims[1].value, None);
        assert_eq!(finding.claims[1].citation, None);
        assert!((finding.confidence - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_missing_confidence_defaults_and_clamps() {
        let finding = parse_finding("risk", "CLAIM: Recession odds are elevated").unwrap();
        assert!((finding.confidence - DEFAULT_CONFIDENCE).abs() < 1e-9);
        let finding = parse_finding("risk", "CLAIM: x rises\nCONFIDENCE: 7").unwrap();
        assert!((finding.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_reply_without_claims_is_validation_error() {
        let err = parse_finding("housing", "I think prices will go up.").unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }

    #[test]
    fn test_claims_capped() {
        let reply: String = (0..8).map(|i| format!("CLAIM: point {i}\n")).collect();
        assert_eq!(parse_finding("markets", &reply).unwrap().claims.len(), MAX_CLAIMS);
    }

    #[test]
    fn test_kind_lookup_normalizes() {
        assert_eq!(AnalystKind::from_name(" Fed-Policy "), Some(AnalystKind::FedPolicy));
        assert_eq!(AnalystKind::from_name("LABOR"), Some(AnalystKind::Labor));
        assert_eq!(AnalystKind::from_name("weather"), None);
    }

    #[test]
    fn test_provider_errors_keep_transience() {
        assert!(matches!(agent_error(ProviderError::Timeout(5)), AgentError::Timeout(5)));
        assert!(matches!(
            agent_error(ProviderError::RateLimited { retry_after: None }),
            AgentError::RateLimited { .. }
        ));
        assert!(matches!(
            agent_error(ProviderError::Provider("500".into())),
            AgentError::Failed(_)
        ));
    }
}
