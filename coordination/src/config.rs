//! Engine configuration.
//!
//! Every field has a default so an empty TOML document is a valid config.
//! Values are loaded from TOML and then overridden from `COUNCIL_*`
//! environment variables.
//!
//! ```toml
//! [runner]
//! agent_timeout_secs = 180
//! group_timeout_secs = 600
//! max_retries = 3
//!
//! [rate_limits]
//! default_calls_per_second = 2.0
//! overrides = { fred = 1.0 }
//!
//! [classifier.budgets]
//! medium = 12
//! complex = 40
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::rate_limit::RateLimiterSet;
use crate::resilience::RetryPolicy;
use crate::state::types::Complexity;

pub const ENV_AGENT_TIMEOUT_SECS: &str = "COUNCIL_AGENT_TIMEOUT_SECS";
pub const ENV_GROUP_TIMEOUT_SECS: &str = "COUNCIL_GROUP_TIMEOUT_SECS";
pub const ENV_MAX_RETRIES: &str = "COUNCIL_MAX_RETRIES";
pub const ENV_MAX_CONCURRENCY: &str = "COUNCIL_MAX_CONCURRENCY";
pub const ENV_DEFAULT_CALLS_PER_SECOND: &str = "COUNCIL_DEFAULT_CALLS_PER_SECOND";

/// Upper bound on any configured duration (one week). Keeps deadline
/// arithmetic on `Instant` from overflowing.
pub const MAX_DURATION_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinationConfig {
    pub runner: RunnerConfig,
    pub rate_limits: RateLimitConfig,
    pub classifier: ClassifierConfig,
    pub contradiction: ContradictionConfig,
    pub debate: DebateConfig,
    pub critique: CritiqueConfig,
    pub verification: VerificationConfig,
    pub synthesis: SynthesisConfig,
}

impl CoordinationConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Override from `COUNCIL_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Override from an arbitrary variable lookup. Unparseable or
    /// non-positive values are ignored.
    pub fn apply_overrides_from<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let r = &mut self.runner;
        r.agent_timeout_secs = u64_from(&lookup, ENV_AGENT_TIMEOUT_SECS, r.agent_timeout_secs);
        r.group_timeout_secs = u64_from(&lookup, ENV_GROUP_TIMEOUT_SECS, r.group_timeout_secs);
        r.max_retries = lookup(ENV_MAX_RETRIES)
            .and_then(|v| v.trim().parse::<u32>().ok())
            .unwrap_or(r.max_retries);
        r.max_concurrency =
            u64_from(&lookup, ENV_MAX_CONCURRENCY, r.max_concurrency as u64) as usize;
        self.rate_limits.default_calls_per_second = lookup(ENV_DEFAULT_CALLS_PER_SECOND)
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite() && *v >= 0.0)
            .unwrap_or(self.rate_limits.default_calls_per_second);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.runner.max_concurrency == 0 {
            return Err(ConfigError::Invalid("runner.max_concurrency must be > 0".into()));
        }
        if self.runner.agent_timeout_secs == 0 || self.runner.group_timeout_secs == 0 {
            return Err(ConfigError::Invalid("runner timeouts must be > 0".into()));
        }
        if self.verification.search_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "verification.search_timeout_secs must be > 0".into(),
            ));
        }
        for (name, secs) in [
            ("runner.agent_timeout_secs", self.runner.agent_timeout_secs),
            ("runner.group_timeout_secs", self.runner.group_timeout_secs),
            ("runner.max_backoff_secs", self.runner.max_backoff_secs),
            ("runner.base_backoff_ms", self.runner.base_backoff_ms / 1_000),
            ("verification.search_timeout_secs", self.verification.search_timeout_secs),
            ("verification.cache_ttl_secs", self.verification.cache_ttl_secs),
        ] {
            if secs > MAX_DURATION_SECS {
                return Err(ConfigError::Invalid(format!(
                    "{} exceeds {} seconds",
                    name, MAX_DURATION_SECS
                )));
            }
        }
        for (name, v) in [
            ("contradiction.numeric_tolerance", self.contradiction.numeric_tolerance),
            ("verification.numeric_tolerance", self.verification.numeric_tolerance),
        ] {
            if !(0.0..1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{} must be in [0, 1)", name)));
            }
        }
        for (name, v) in [
            ("critique.min_confidence", self.critique.min_confidence),
            ("verification.similarity_threshold", self.verification.similarity_threshold),
            (
                "verification.source_priority_threshold",
                self.verification.source_priority_threshold,
            ),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(ConfigError::Invalid(format!("{} must be in [0, 1]", name)));
            }
        }
        Ok(())
    }
}

fn u64_from<F>(lookup: &F, key: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .filter(|v| *v > 0)
        .unwrap_or(default)
}

/// Agent execution limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Hard timeout on a single collaborator call.
    pub agent_timeout_secs: u64,
    /// Wall-clock ceiling on the whole agent group.
    pub group_timeout_secs: u64,
    pub max_retries: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_secs: u64,
    pub max_concurrency: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            agent_timeout_secs: 180,
            group_timeout_secs: 600,
            max_retries: 3,
            base_backoff_ms: 500,
            max_backoff_secs: 30,
            max_concurrency: 8,
        }
    }
}

impl RunnerConfig {
    pub fn agent_timeout(&self) -> Duration {
        Duration::from_secs(self.agent_timeout_secs)
    }

    pub fn group_timeout(&self) -> Duration {
        Duration::from_secs(self.group_timeout_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_secs(self.max_backoff_secs),
        }
    }
}

/// Outbound call rates, keyed by resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Zero disables limiting.
    pub default_calls_per_second: f64,
    pub overrides: HashMap<String, f64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            default_calls_per_second: 2.0,
            overrides: HashMap::new(),
        }
    }
}

impl RateLimitConfig {
    pub fn build(&self) -> RateLimiterSet {
        RateLimiterSet::with_overrides(self.default_calls_per_second, self.overrides.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    /// Longer queries are rejected.
    pub max_query_chars: usize,
    pub budgets: DebateBudgets,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            max_query_chars: 4_000,
            budgets: DebateBudgets::default(),
        }
    }
}

/// Debate turn budget per complexity tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateBudgets {
    pub simple: u32,
    pub medium: u32,
    pub complex: u32,
    pub critical: u32,
}

impl Default for DebateBudgets {
    fn default() -> Self {
        Self {
            simple: 0,
            medium: 12,
            complex: 40,
            critical: 60,
        }
    }
}

impl DebateBudgets {
    pub fn for_complexity(&self, complexity: Complexity) -> u32 {
        match complexity {
            Complexity::Simple => self.simple,
            Complexity::Medium => self.medium,
            Complexity::Complex => self.complex,
            Complexity::Critical => self.critical,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ContradictionConfig {
    /// Relative difference above which two values on a topic conflict.
    pub numeric_tolerance: f64,
}

impl Default for ContradictionConfig {
    fn default() -> Self {
        Self {
            numeric_tolerance: 0.05,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebateConfig {
    /// Debate independent contradictions concurrently.
    pub parallel_contradictions: bool,
    /// Speaker name used for moderator turns.
    pub moderator_name: String,
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            parallel_contradictions: false,
            moderator_name: "moderator".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CritiqueConfig {
    /// Only claims from findings at or above this confidence are critiqued.
    pub min_confidence: f64,
    pub max_claims: usize,
    pub low_adjustment: f64,
    pub medium_adjustment: f64,
    pub high_adjustment: f64,
}

impl Default for CritiqueConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            max_claims: 8,
            low_adjustment: -0.05,
            medium_adjustment: -0.1,
            high_adjustment: -0.2,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VerificationConfig {
    pub top_k: usize,
    pub similarity_threshold: f64,
    pub source_priority_threshold: f64,
    /// Relative tolerance for numeric agreement with evidence.
    pub numeric_tolerance: f64,
    pub cache_ttl_secs: u64,
    /// Per-search ceiling on the evidence index.
    pub search_timeout_secs: u64,
    /// Priority per source name, matched case-insensitively by prefix.
    pub source_priorities: HashMap<String, f64>,
    pub default_source_priority: f64,
}

impl Default for VerificationConfig {
    fn default() -> Self {
        let source_priorities = [
            ("bls", 1.0),
            ("fred", 0.95),
            ("bea", 0.95),
            ("census", 0.9),
            ("federal_reserve", 0.9),
            ("news", 0.4),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        Self {
            top_k: 5,
            similarity_threshold: 0.5,
            source_priority_threshold: 0.5,
            numeric_tolerance: 0.05,
            cache_ttl_secs: 3_600,
            search_timeout_secs: 30,
            source_priorities,
            default_source_priority: 0.5,
        }
    }
}

impl VerificationConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn search_timeout(&self) -> Duration {
        Duration::from_secs(self.search_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SynthesisConfig {
    /// Claims listed in the deterministic fallback answer.
    pub max_fallback_claims: usize,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_fallback_claims: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = CoordinationConfig::from_toml_str("").unwrap();
        assert_eq!(config.runner.agent_timeout(), Duration::from_secs(180));
        assert_eq!(config.runner.group_timeout(), Duration::from_secs(600));
        assert_eq!(config.runner.max_retries, 3);
        assert_eq!(config.classifier.budgets.for_complexity(Complexity::Complex), 40);
        assert_eq!(config.classifier.budgets.for_complexity(Complexity::Simple), 0);
        assert!(!config.debate.parallel_contradictions);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = CoordinationConfig::from_toml_str(
            r#"
            [runner]
            agent_timeout_secs = 30

            [rate_limits.overrides]
            fred = 1.0

            [classifier.budgets]
            critical = 80
            "#,
        )
        .unwrap();
        assert_eq!(config.runner.agent_timeout_secs, 30);
        assert_eq!(config.runner.group_timeout_secs, 600);
        assert_eq!(config.rate_limits.build().rate_for("fred"), 1.0);
        assert_eq!(config.classifier.budgets.critical, 80);
        assert_eq!(config.classifier.budgets.medium, 12);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = CoordinationConfig::from_toml_str("[runner]\nmax_concurrency = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err =
            CoordinationConfig::from_toml_str("[critique]\nmin_confidence = 1.5").unwrap_err();
        assert!(err.to_string().contains("critique.min_confidence"));

        let err = CoordinationConfig::from_toml_str("runner = 5").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = CoordinationConfig::from_toml_str("[verification]\nsearch_timeout_secs = 0")
            .unwrap_err();
        assert!(err.to_string().contains("search_timeout_secs"));
    }

    #[test]
    fn test_oversized_durations_rejected() {
        let err = CoordinationConfig::from_toml_str(&format!(
            "[runner]\nagent_timeout_secs = {}",
            i64::MAX
        ))
        .unwrap_err();
        assert!(err.to_string().contains("runner.agent_timeout_secs"));

        for section in [
            "[runner]\ngroup_timeout_secs = 604801",
            "[runner]\nbase_backoff_ms = 9223372036854775807",
            "[verification]\ncache_ttl_secs = 999999999",
            "[verification]\nsearch_timeout_secs = 604801",
        ] {
            assert!(
                matches!(
                    CoordinationConfig::from_toml_str(section),
                    Err(ConfigError::Invalid(_))
                ),
                "{section} should be rejected"
            );
        }

        let at_cap = format!("[runner]\ngroup_timeout_secs = {}", MAX_DURATION_SECS);
        assert!(CoordinationConfig::from_toml_str(&at_cap).is_ok());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CoordinationConfig::default();
        let vars: HashMap<&str, &str> = [
            (ENV_AGENT_TIMEOUT_SECS, "45"),
            (ENV_GROUP_TIMEOUT_SECS, "not-a-number"),
            (ENV_MAX_RETRIES, "0"),
            (ENV_MAX_CONCURRENCY, "0"),
            (ENV_DEFAULT_CALLS_PER_SECOND, "0.5"),
        ]
        .into_iter()
        .collect();
        config.apply_overrides_from(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.runner.agent_timeout_secs, 45);
        assert_eq!(config.runner.group_timeout_secs, 600);
        assert_eq!(config.runner.max_retries, 0);
        assert_eq!(config.runner.max_concurrency, 8);
        assert_eq!(config.rate_limits.default_calls_per_second, 0.5);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[debate]\nparallel_contradictions = true").unwrap();
        let config = CoordinationConfig::load(file.path()).unwrap();
        assert!(config.debate.parallel_contradictions);

        let missing = CoordinationConfig::load(Path::new("/nonexistent/council.toml"));
        assert!(matches!(missing, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_retry_policy_from_config() {
        let runner = RunnerConfig {
            max_retries: 2,
            base_backoff_ms: 100,
            ..RunnerConfig::default()
        };
        let policy = runner.retry_policy();
        assert_eq!(policy.max_attempts(), 3);
        assert_eq!(policy.backoff_for(1), Duration::from_millis(200));
    }
}
