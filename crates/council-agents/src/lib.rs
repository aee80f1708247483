//! Concrete collaborators for the analyst council.
//!
//! `coordination` only knows its collaborator traits. This crate supplies
//! the OpenAI-compatible [`OpenAiCompatProvider`], the prompt-backed
//! [`PromptedAnalyst`] variants, a [`KeywordEvidenceIndex`] and the TOML
//! [`AppConfig`] that wires them together for the `council` binary.

pub mod analyst;
pub mod config;
pub mod evidence;
pub mod provider;

use anyhow::Result;
use std::sync::Arc;

use coordination::{Collaborators, CompletionProvider, EvidenceIndex, InMemoryCache, NoEvidence};

pub use analyst::{build_registry, AnalystKind, PromptedAnalyst};
pub use config::{AppConfig, ProviderSettings};
pub use evidence::{Document, KeywordEvidenceIndex};
pub use provider::OpenAiCompatProvider;

/// Collaborators backed by the configured OpenAI-compatible endpoint.
pub fn collaborators(config: &AppConfig) -> Result<Collaborators> {
    let provider: Arc<dyn CompletionProvider> =
        Arc::new(OpenAiCompatProvider::new(config.provider.clone()));
    collaborators_with(config, provider)
}

/// Collaborators around an arbitrary completion provider.
pub fn collaborators_with(
    config: &AppConfig,
    provider: Arc<dyn CompletionProvider>,
) -> Result<Collaborators> {
    let evidence: Arc<dyn EvidenceIndex> = match &config.evidence_path {
        Some(path) => Arc::new(KeywordEvidenceIndex::load(path)?),
        None => Arc::new(NoEvidence),
    };
    let registry = build_registry(
        &config.analysts,
        provider.clone(),
        config.engine.runner.agent_timeout(),
    )?;
    Ok(Collaborators {
        provider,
        evidence,
        cache: Arc::new(InMemoryCache::new()),
        registry: Arc::new(registry),
    })
}
