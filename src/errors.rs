use thiserror::Error;

use crate::llm::ProviderError;

/// Stage-level error taxonomy consumed by the orchestration loops.
///
/// Each variant wraps the provider error that caused it, so fallback
/// decisions are a pure match on the observed kind: routing, planning,
/// retrieval and validation failures all degrade in place; only generation
/// failure escalates to loop-level fallback.
#[derive(Debug, Clone, Error)]
pub enum RagError {
    #[error("query routing failed: {0}")]
    Routing(#[source] ProviderError),
    #[error("planning failed: {0}")]
    Planning(#[source] ProviderError),
    #[error("retrieval failed: {0}")]
    Retrieval(#[source] ProviderError),
    #[error("generation failed: {0}")]
    Generation(#[source] ProviderError),
    #[error("validation failed: {0}")]
    Validation(#[source] ProviderError),
}
