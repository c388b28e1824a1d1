// Retrieval coordinator
// Turns plan steps into retrieval calls: direct single-query lookup,
// decomposed multi-query fan-out, or a broadened second attempt when the
// first pass graded out entirely. Provider outages degrade to an empty
// result; an empty knowledge-base response is never an error.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::errors::RagError;
use crate::llm::{parse_json_payload, with_retry, CompletionProvider, CompletionRequest};
use crate::rag::context::ExecutionContext;
use crate::rag::types::PlanStep;
use crate::retrieval::{Reranker, RetrievalProvider, ScoredDocument};

use super::{Agent, StepOutcome};

/// Documents requested on follow-up (RetrieveMore) passes.
const EXPANDED_TOP_K: usize = 5;
/// Sub-query cap for decomposed retrieval.
const MAX_SUB_QUERIES: usize = 3;

#[derive(Debug, Deserialize)]
struct SubQueryPayload {
    queries: Vec<String>,
}

pub struct RetrievalCoordinator {
    retrieval: Arc<dyn RetrievalProvider>,
    completion: Arc<dyn CompletionProvider>,
    reranker: Option<Arc<dyn Reranker>>,
    config: EngineConfig,
}

impl RetrievalCoordinator {
    pub fn new(
        retrieval: Arc<dyn RetrievalProvider>,
        completion: Arc<dyn CompletionProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            retrieval,
            completion,
            reranker,
            config,
        }
    }

    fn decompose_prompt(query: &str, step: &PlanStep) -> String {
        let step_note = step
            .description
            .as_deref()
            .unwrap_or_else(|| step.target.as_deref().unwrap_or(query));
        format!(
            r#"Generate 1-3 focused search queries to retrieve information.

Original query: "{query}"
Current step: {step_note}

Each query should be a clear, focused search phrase that will find relevant
information in a knowledge base.

Respond in JSON format:
{{"queries": ["query 1", "query 2"]}}"#
        )
    }

    /// Split a step into 1-3 sub-queries via the completion provider,
    /// falling back to the literal target on any failure.
    async fn decompose(&self, query: &str, step: &PlanStep) -> Vec<String> {
        let target = step.target.clone().unwrap_or_else(|| query.to_string());
        let request =
            CompletionRequest::from_user(Self::decompose_prompt(query, step)).expect_json();

        let queries = match with_retry(&self.config.retry, || {
            self.completion.complete(request.clone())
        })
        .await
        .and_then(|text| parse_json_payload::<SubQueryPayload>(&text))
        {
            Ok(payload) => payload.queries,
            Err(err) => {
                tracing::warn!("query decomposition failed ({err}), using literal target");
                Vec::new()
            }
        };

        let mut result: Vec<String> = Vec::new();
        for q in queries {
            let trimmed = q.trim().to_string();
            if !trimmed.is_empty() && !result.contains(&trimmed) {
                result.push(trimmed);
            }
            if result.len() == MAX_SUB_QUERIES {
                break;
            }
        }
        if result.is_empty() {
            result.push(target);
        }
        result
    }

    /// One provider search with retry. Outage after retries degrades to an
    /// empty list so the loop can proceed in clarification mode.
    async fn search_one(&self, query: String, top_k: usize) -> Vec<ScoredDocument> {
        match with_retry(&self.config.retry, || self.retrieval.search(&query, top_k)).await {
            Ok(docs) => docs,
            Err(err) => {
                tracing::warn!("retrieval for '{query}' failed after retries: {err}");
                Vec::new()
            }
        }
    }

    /// Execute one retrieve step: formulate queries, fan out bounded
    /// searches, fan in, optionally rerank, and stage deduplicated results.
    pub async fn retrieve(&self, ctx: &mut ExecutionContext, step: &PlanStep) -> usize {
        let started = Instant::now();

        let queries = if step.multi_query {
            self.decompose(&ctx.query, step).await
        } else {
            vec![step.target.clone().unwrap_or_else(|| ctx.query.clone())]
        };

        let top_k = self.config.top_k;
        // owned strings: borrowing the queries here trips higher-ranked
        // lifetime inference inside the boxed trait method
        let results: Vec<Vec<ScoredDocument>> = stream::iter(
            queries
                .clone()
                .into_iter()
                .map(|q| self.search_one(q, top_k)),
        )
        .buffered(self.config.concurrency_limit)
        .collect()
        .await;

        let mut merged: Vec<ScoredDocument> = results.into_iter().flatten().collect();
        merged = self.maybe_rerank(&ctx.query, merged).await;

        let staged = ctx.stage_retrieved(merged);
        ctx.record(
            "retrieval",
            "retrieve_documents",
            queries.join(" | "),
            format!("{staged} new documents"),
            started,
        );
        staged
    }

    /// Follow-up retrieval for a RetrieveMore decision: smaller page against
    /// an expanded query, staged for re-grading.
    pub async fn retrieve_expanded(&self, ctx: &mut ExecutionContext, query: &str) -> usize {
        let started = Instant::now();
        let docs = self.search_one(query.to_string(), EXPANDED_TOP_K).await;
        let staged = ctx.stage_retrieved(docs);
        ctx.record(
            "retrieval",
            "retrieve_expanded",
            query.to_string(),
            format!("{staged} new documents"),
            started,
        );
        staged
    }

    /// Broadened second attempt after a first pass graded out completely:
    /// drop specificity constraints from the query and search once more.
    pub async fn retrieve_broadened(&self, ctx: &mut ExecutionContext) -> usize {
        let started = Instant::now();
        let broadened = broaden_query(&ctx.query);
        let docs = self.search_one(broadened.clone(), self.config.top_k).await;
        let staged = ctx.stage_retrieved(docs);
        ctx.record(
            "retrieval",
            "retrieve_broadened",
            broadened,
            format!("{staged} new documents"),
            started,
        );
        staged
    }

    async fn maybe_rerank(
        &self,
        query: &str,
        documents: Vec<ScoredDocument>,
    ) -> Vec<ScoredDocument> {
        let Some(reranker) = &self.reranker else {
            return documents;
        };
        if documents.len() <= self.config.rerank_top_k {
            return documents;
        }
        match reranker
            .rerank(query, documents.clone(), self.config.top_k)
            .await
        {
            Ok(reranked) => reranked,
            Err(err) => {
                tracing::warn!("reranking failed ({err}), keeping retrieval order");
                documents
            }
        }
    }
}

/// Drop specificity constraints from a query: quoted phrases and numeric
/// tokens go, and long queries are truncated to their leading terms.
pub(crate) fn broaden_query(query: &str) -> String {
    let without_quotes: String = {
        let mut out = String::with_capacity(query.len());
        let mut in_quotes = false;
        for c in query.chars() {
            match c {
                '"' | '\u{201c}' | '\u{201d}' => in_quotes = !in_quotes,
                _ if !in_quotes => out.push(c),
                _ => {}
            }
        }
        out
    };

    let words: Vec<&str> = without_quotes
        .split_whitespace()
        .filter(|w| !w.chars().any(|c| c.is_ascii_digit()))
        .take(6)
        .collect();

    if words.is_empty() {
        query.to_string()
    } else {
        words.join(" ")
    }
}

#[async_trait]
impl Agent for RetrievalCoordinator {
    fn id(&self) -> &'static str {
        "retrieval"
    }

    fn name(&self) -> &'static str {
        "Retrieval Coordinator"
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        step: &PlanStep,
    ) -> Result<StepOutcome, RagError> {
        let staged = self.retrieve(ctx, step).await;
        Ok(StepOutcome::Retrieved { staged })
    }
}
