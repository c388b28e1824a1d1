// Grading agent
// Scores (query, document) pairs for relevance and filters below the
// configured threshold. Each grade is a pure function of its inputs, so a
// batch fans out one completion call per document under a concurrency cap
// and fans in before the loop advances.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::errors::RagError;
use crate::llm::{parse_json_payload, with_retry, CompletionProvider, CompletionRequest};
use crate::rag::context::ExecutionContext;
use crate::rag::types::{Document, PlanStep};
use crate::retrieval::ScoredDocument;

use super::{Agent, StepOutcome};

/// Content prefix shown to the grading model.
const GRADE_CONTENT_LIMIT: usize = 600;

#[derive(Debug, Deserialize)]
struct GradePayload {
    relevance_score: f32,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    key_points: Vec<String>,
}

/// Verdict for one (query, document) pair.
#[derive(Debug, Clone)]
pub struct GradeReport {
    pub relevance_score: f32,
    pub is_relevant: bool,
    pub explanation: Option<String>,
    pub key_points: Vec<String>,
}

pub struct Grader {
    completion: Arc<dyn CompletionProvider>,
    config: EngineConfig,
}

impl Grader {
    pub fn new(completion: Arc<dyn CompletionProvider>, config: EngineConfig) -> Self {
        Self { completion, config }
    }

    fn prompt(query: &str, content: &str) -> String {
        let excerpt: String = content.chars().take(GRADE_CONTENT_LIMIT).collect();
        format!(
            r#"Grade this document's relevance to the query.

Query: "{query}"

Document:
{excerpt}

Evaluate:
1. Relevance: Does it help answer the query?
2. Completeness: Does it provide sufficient information?
3. Specificity: Is it specific or too generic?

Respond in JSON:
{{
    "relevance_score": 0.0-1.0,
    "reasoning": "brief explanation",
    "key_points": ["point 1", "point 2"]
}}"#
        )
    }

    /// Grade one document. Stateless: identical inputs under identical
    /// provider behaviour always yield the same verdict, and the relevance
    /// flag is derived locally from the configured threshold.
    pub async fn grade(
        &self,
        query: &str,
        document: &ScoredDocument,
    ) -> Result<GradeReport, RagError> {
        let request =
            CompletionRequest::from_user(Self::prompt(query, &document.content)).expect_json();
        let payload: GradePayload = with_retry(&self.config.retry, || {
            self.completion.complete(request.clone())
        })
        .await
        .and_then(|text| parse_json_payload(&text))
        .map_err(RagError::Retrieval)?;

        let score = payload.relevance_score.clamp(0.0, 1.0);
        Ok(GradeReport {
            relevance_score: score,
            is_relevant: score > self.config.relevance_threshold,
            explanation: payload.reasoning,
            key_points: payload.key_points,
        })
    }

    /// Grade every staged document concurrently and keep the relevant ones.
    /// Documents whose grading call fails are dropped rather than passed
    /// ungraded to generation.
    pub async fn grade_staged(&self, ctx: &mut ExecutionContext) -> usize {
        let started = Instant::now();
        let staged = std::mem::take(&mut ctx.retrieved);
        let total = staged.len();
        let query = ctx.query.clone();

        let reports: Vec<(ScoredDocument, Option<GradeReport>)> =
            stream::iter(staged.into_iter().map(|doc| {
                let query = query.clone();
                async move {
                    let report = match self.grade(&query, &doc).await {
                        Ok(report) => Some(report),
                        Err(err) => {
                            tracing::warn!("grading document {} failed: {err}", doc.id);
                            None
                        }
                    };
                    (doc, report)
                }
            }))
            .buffered(self.config.concurrency_limit)
            .collect()
            .await;

        let mut kept = Vec::new();
        for (doc, report) in reports {
            let Some(report) = report else { continue };
            if report.is_relevant {
                kept.push(Document {
                    id: doc.id,
                    content: doc.content,
                    source: doc.source,
                    category: doc.category,
                    relevance_score: report.relevance_score,
                    key_points: report.key_points,
                });
            }
        }

        let kept_count = kept.len();
        ctx.extend_documents(kept);
        ctx.record(
            "grader",
            "grade_documents",
            format!("{total} documents"),
            format!("{kept_count} relevant"),
            started,
        );
        kept_count
    }
}

#[async_trait]
impl Agent for Grader {
    fn id(&self) -> &'static str {
        "grader"
    }

    fn name(&self) -> &'static str {
        "Relevance Grader"
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _step: &PlanStep,
    ) -> Result<StepOutcome, RagError> {
        let kept = self.grade_staged(ctx).await;
        Ok(StepOutcome::Graded { kept })
    }
}
