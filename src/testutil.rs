// Deterministic test doubles for the provider boundaries.
// Completion mocks match on request content rather than call order so that
// concurrent fan-out stays deterministic.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::config::{EngineConfig, RetryPolicy};
use crate::llm::{CompletionProvider, CompletionRequest, ProviderError};
use crate::retrieval::{Reranker, RetrievalProvider, ScoredDocument};

/// Default config with millisecond retry delays so failure-path tests run
/// fast.
pub fn fast_config() -> EngineConfig {
    EngineConfig {
        retry: RetryPolicy {
            max_retries: 2,
            base_delay_ms: 1,
            per_call_timeout_ms: 1_000,
        },
        ..EngineConfig::default()
    }
}

/// Completion provider that answers by substring rule: the first rule whose
/// key appears anywhere in the request's message contents wins, otherwise
/// the default response is returned.
pub struct RuleCompletion {
    rules: Vec<(String, String)>,
    default: String,
    calls: AtomicUsize,
}

impl RuleCompletion {
    pub fn new(rules: Vec<(&str, &str)>, default: &str) -> Self {
        Self {
            rules: rules
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            default: default.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_default(default: &str) -> Self {
        Self::new(Vec::new(), default)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for RuleCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let text: String = request
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");
        for (key, response) in &self.rules {
            if text.contains(key) {
                return Ok(response.clone());
            }
        }
        Ok(self.default.clone())
    }
}

/// Completion provider that fails transiently a fixed number of times, then
/// (optionally) starts succeeding.
pub struct FailingCompletion {
    failures: usize,
    error: fn() -> ProviderError,
    response: Option<String>,
    calls: AtomicUsize,
}

impl FailingCompletion {
    /// Every call fails with `Unavailable`.
    pub fn always_unavailable() -> Self {
        Self {
            failures: usize::MAX,
            error: || ProviderError::Unavailable("provider down".to_string()),
            response: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// The first `failures` calls fail with `RateLimited`, later calls
    /// return `response`.
    pub fn rate_limited_then(failures: usize, response: &str) -> Self {
        Self {
            failures,
            error: || ProviderError::RateLimited,
            response: Some(response.to_string()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FailingCompletion {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err((self.error)());
        }
        match &self.response {
            Some(response) => Ok(response.clone()),
            None => Err((self.error)()),
        }
    }
}

/// Rule-based completion provider whose first `failures` calls fail with
/// `RateLimited` before delegating to the rules. Exercises retry paths
/// end to end.
pub struct FlakyCompletion {
    inner: RuleCompletion,
    failures: usize,
    calls: AtomicUsize,
}

impl FlakyCompletion {
    pub fn new(failures: usize, rules: Vec<(&str, &str)>, default: &str) -> Self {
        Self {
            inner: RuleCompletion::new(rules, default),
            failures,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FlakyCompletion {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures {
            return Err(ProviderError::RateLimited);
        }
        self.inner.complete(request).await
    }
}

/// Completion provider that sleeps before answering, for wall-clock budget
/// tests.
pub struct SlowCompletion {
    delay_ms: u64,
    response: String,
}

impl SlowCompletion {
    pub fn new(delay_ms: u64, response: &str) -> Self {
        Self {
            delay_ms,
            response: response.to_string(),
        }
    }
}

#[async_trait]
impl CompletionProvider for SlowCompletion {
    async fn complete(&self, _request: CompletionRequest) -> Result<String, ProviderError> {
        tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
        Ok(self.response.clone())
    }
}

/// Retrieval provider backed by fixed in-memory documents, optionally keyed
/// by query substring.
pub struct StaticRetrieval {
    /// (query substring, documents); an empty key matches every query
    keyed: Vec<(String, Vec<ScoredDocument>)>,
    calls: AtomicUsize,
}

impl StaticRetrieval {
    fn doc((id, content, source): (&str, &str, &str), rank: usize) -> ScoredDocument {
        ScoredDocument {
            id: id.to_string(),
            content: content.to_string(),
            source: source.to_string(),
            category: None,
            similarity: 0.9 - rank as f32 * 0.05,
        }
    }

    /// Same documents for every query.
    pub fn with_docs(docs: Vec<(&str, &str, &str)>) -> Self {
        let docs = docs
            .into_iter()
            .enumerate()
            .map(|(i, d)| Self::doc(d, i))
            .collect();
        Self {
            keyed: vec![(String::new(), docs)],
            calls: AtomicUsize::new(0),
        }
    }

    /// Documents per query substring; unmatched queries return nothing.
    pub fn keyed(entries: Vec<(&str, Vec<(&str, &str, &str)>)>) -> Self {
        let keyed = entries
            .into_iter()
            .map(|(key, docs)| {
                let docs = docs
                    .into_iter()
                    .enumerate()
                    .map(|(i, d)| Self::doc(d, i))
                    .collect();
                (key.to_string(), docs)
            })
            .collect();
        Self {
            keyed,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn empty() -> Self {
        Self {
            keyed: Vec::new(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalProvider for StaticRetrieval {
    async fn search(
        &self,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut result = Vec::new();
        for (key, docs) in &self.keyed {
            if key.is_empty() || query.contains(key.as_str()) {
                result.extend(docs.iter().cloned());
            }
        }
        result.truncate(top_k);
        Ok(result)
    }
}

/// Retrieval provider that always fails with `Unavailable`.
pub struct FailingRetrieval {
    calls: AtomicUsize,
}

impl FailingRetrieval {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RetrievalProvider for FailingRetrieval {
    async fn search(
        &self,
        _query: &str,
        _top_k: usize,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ProviderError::Unavailable("index down".to_string()))
    }
}

/// Reranker that sorts by similarity and truncates to `top_k`.
pub struct SimilarityReranker;

#[async_trait]
impl Reranker for SimilarityReranker {
    async fn rerank(
        &self,
        _query: &str,
        mut documents: Vec<ScoredDocument>,
        top_k: usize,
    ) -> Result<Vec<ScoredDocument>, ProviderError> {
        documents.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        documents.truncate(top_k);
        Ok(documents)
    }
}
