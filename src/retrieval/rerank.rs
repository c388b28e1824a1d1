use async_trait::async_trait;

use crate::llm::ProviderError;

use super::provider::ScoredDocument;

/// Cross-encoder reranking capability, consumed when wired in.
///
/// The engines work without one; when present it reorders candidates by
/// (query, content) relevance and truncates to `top_k`.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn rerank(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, ProviderError>;
}
