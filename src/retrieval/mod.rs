pub mod provider;
pub mod rerank;

pub use provider::{RetrievalProvider, ScoredDocument};
pub use rerank::Reranker;
