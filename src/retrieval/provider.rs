use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::llm::ProviderError;

/// A document as returned by the retrieval provider, before grading.
///
/// `similarity` is the provider's own vector-similarity score and is only
/// used for initial ordering; relevance for generation purposes is assigned
/// later by the grader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredDocument {
    pub id: String,
    pub content: String,
    pub source: String,
    pub category: Option<String>,
    pub similarity: f32,
}

/// Vector-search capability consumed by the retrieval coordinator.
///
/// Implementations must be idempotent for identical inputs against a static
/// corpus. Returning an empty list is not an error.
#[async_trait]
pub trait RetrievalProvider: Send + Sync {
    async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredDocument>, ProviderError>;
}
