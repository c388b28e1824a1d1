//! Adaptive RAG orchestration engine for customer-support queries.
//!
//! Three entry points over the same agent set and provider boundaries:
//!
//! - [`rag::TraditionalRag`]: fixed retrieve -> rerank -> generate pipeline.
//! - [`rag::SelfRag`]: iterative self-checking loop that grades its own
//!   retrieval and evaluates its own answers before returning them.
//! - [`rag::AgenticRag`]: multi-agent state machine that routes, plans,
//!   executes plan steps, validates, and adapts.
//!
//! The engine owns orchestration only. Embeddings, vector search, reranking
//! models, and the language model itself are consumed through the
//! [`llm::CompletionProvider`], [`retrieval::RetrievalProvider`], and
//! [`retrieval::Reranker`] traits.

pub mod agents;
pub mod config;
pub mod errors;
pub mod llm;
pub mod logging;
pub mod rag;
pub mod retrieval;

#[cfg(test)]
pub mod testutil;

pub use config::{EngineConfig, RetryPolicy};
pub use errors::RagError;
pub use rag::{AgenticRag, RagResult, SelfRag, TraditionalRag};
