use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::info;

use coordination::workflow::extract::content_tokens;
use coordination::{Evidence, EvidenceError, EvidenceIndex};

/// One indexed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub text: String,
    pub source: String,
}

/// In-memory evidence index scored by content-word overlap.
///
/// A document's score is the share of the claim's content words it
/// contains, so a document covering every term scores 1.0.
#[derive(Debug, Default)]
pub struct KeywordEvidenceIndex {
    docs: Vec<(Document, BTreeSet<String>)>,
}

impl KeywordEvidenceIndex {
    pub fn new(documents: Vec<Document>) -> Self {
        let docs = documents
            .into_iter()
            .map(|d| {
                let tokens = content_tokens(&d.text).into_iter().collect();
                (d, tokens)
            })
            .collect();
        Self { docs }
    }

    /// Load a JSON array of `{text, source}` documents.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read evidence file {}", path.display()))?;
        let documents: Vec<Document> = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse evidence file {}", path.display()))?;
        info!(path = %path.display(), documents = documents.len(), "Evidence index loaded");
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

#[async_trait]
impl EvidenceIndex for KeywordEvidenceIndex {
    async fn search(&self, claim_text: &str, top_k: usize) -> Result<Vec<Evidence>, EvidenceError> {
        let terms = content_tokens(claim_text);
        if terms.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let mut hits: Vec<Evidence> = self
            .docs
            .iter()
            .filter_map(|(doc, tokens)| {
                let shared = terms.iter().filter(|t| tokens.contains(*t)).count();
                (shared > 0).then(|| Evidence {
                    text: doc.text.clone(),
                    source: doc.source.clone(),
                    score: shared as f64 / terms.len() as f64,
                })
            })
            .collect();
        // Stable sort keeps file order among equal scores.
        hits.sort_by(|a, b| b.score.total_cmp(&a.score));
        hits.truncate(top_k);
        Ok(hits)
    }
}
