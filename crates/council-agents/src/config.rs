use anyhow::{Context, Result};
use coordination::CoordinationConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::analyst::AnalystKind;

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// Base URL including the API version, e.g. `http://localhost:8080/v1`.
    pub base_url: String,
    pub model: String,
    /// Environment variable holding the bearer token.
    pub api_key_env: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: std::env::var("COUNCIL_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".into()),
            model: std::env::var("COUNCIL_MODEL").unwrap_or_else(|_| "gpt-4o-mini".into()),
            api_key_env: "COUNCIL_API_KEY".into(),
            max_tokens: 1024,
            temperature: 0.2,
        }
    }
}

impl ProviderSettings {
    /// Bearer token, if the configured variable is set and non-empty.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

/// Top-level `council` configuration: the engine config plus the
/// collaborators it is wired to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderSettings,
    /// Analysts to register, by name.
    pub analysts: Vec<String>,
    /// JSON file of `{text, source}` documents for the evidence index.
    pub evidence_path: Option<PathBuf>,
    #[serde(flatten)]
    pub engine: CoordinationConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            provider: ProviderSettings::default(),
            analysts: AnalystKind::ALL.iter().map(|k| k.name().to_string()).collect(),
            evidence_path: None,
            engine: CoordinationConfig::default(),
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).context("Failed to parse council config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml_str(&raw).with_context(|| format!("Invalid config {}", path.display()))
    }

    /// `load(path)` when given, defaults otherwise; env overrides applied
    /// either way.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load(p)?,
            None => Self::default(),
        };
        config.engine.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("Invalid engine config")?;
        if self.analysts.is_empty() {
            anyhow::bail!("at least one analyst must be configured");
        }
        for name in &self.analysts {
            AnalystKind::from_name(name)
                .with_context(|| format!("unknown analyst {name:?}"))?;
        }
        Ok(())
    }

    /// Keep only the analysts named in `only`, in configured order.
    pub fn restrict_analysts(&mut self, only: &[String]) -> Result<()> {
        let mut analysts: Vec<String> = Vec::new();
        for name in only {
            let kind = AnalystKind::from_name(name)
                .with_context(|| format!("unknown analyst {name:?}"))?;
            if !analysts.iter().any(|a| a == kind.name()) {
                analysts.push(kind.name().to_string());
            }
        }
        self.analysts = analysts;
        Ok(())
    }
}
