// Validation agent (self-evaluator)
// Scores an answer along grounding, completeness, and utility, then derives
// the corrective decision locally. The overall quality label is always
// computed from the three scores, never taken from the provider.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::errors::RagError;
use crate::llm::{parse_json_payload, with_retry, CompletionProvider, CompletionRequest};
use crate::rag::context::ExecutionContext;
use crate::rag::types::{Decision, DimensionScore, Document, Evaluation, PlanStep};

use super::generator::has_citations;
use super::{Agent, StepOutcome};

/// Source prefix shown to the evaluation model.
const SOURCE_SUMMARY_LIMIT: usize = 200;

#[derive(Debug, Deserialize)]
struct DimensionPayload {
    score: f32,
    #[serde(default, alias = "issues", alias = "missing")]
    findings: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EvaluationPayload {
    grounded: DimensionPayload,
    complete: DimensionPayload,
    useful: DimensionPayload,
}

pub struct Validator {
    completion: Arc<dyn CompletionProvider>,
    config: EngineConfig,
}

impl Validator {
    pub fn new(completion: Arc<dyn CompletionProvider>, config: EngineConfig) -> Self {
        Self { completion, config }
    }

    fn prompt(query: &str, answer: &str, documents: &[Document]) -> String {
        let source_summary = if documents.is_empty() {
            "No sources (conversational or clarification response)".to_string()
        } else {
            documents
                .iter()
                .enumerate()
                .map(|(i, doc)| {
                    let excerpt: String = doc.content.chars().take(SOURCE_SUMMARY_LIMIT).collect();
                    format!("Source {}: {excerpt}...", i + 1)
                })
                .collect::<Vec<_>>()
                .join("\n")
        };

        format!(
            r#"Evaluate this answer across three dimensions.

Query: "{query}"

Context Sources:
{source_summary}

Generated Answer:
{answer}

Evaluate:
1. GROUNDED: Is the answer supported by the context sources? Are there any unsupported claims? An answer that cites nothing and claims nothing from sources is fully grounded.
2. COMPLETE: Does the answer fully address the question, or is important information missing?
3. USEFUL: Does the answer actually help the user?

Respond in JSON format:
{{
    "grounded": {{"score": 0.0-1.0, "issues": ["unsupported claims if any"]}},
    "complete": {{"score": 0.0-1.0, "missing": ["missing information if any"]}},
    "useful": {{"score": 0.0-1.0, "issues": ["usefulness issues if any"]}}
}}"#
        )
    }

    /// Score the answer. Provider failure after retries surfaces as a
    /// validation error; the loop then accepts the answer unvalidated
    /// rather than looping forever.
    pub async fn validate(
        &self,
        ctx: &mut ExecutionContext,
        answer: &str,
    ) -> Result<(Evaluation, Decision), RagError> {
        let started = Instant::now();
        let request =
            CompletionRequest::from_user(Self::prompt(&ctx.query, answer, &ctx.documents))
                .expect_json();

        let payload: EvaluationPayload = with_retry(&self.config.retry, || {
            self.completion.complete(request.clone())
        })
        .await
        .and_then(|text| parse_json_payload(&text))
        .map_err(RagError::Validation)?;

        let mut grounded = DimensionScore {
            score: payload.grounded.score.clamp(0.0, 1.0),
            findings: payload.grounded.findings,
        };
        // An answer with no sources that cites nothing has made no sourced
        // claims: grounding is vacuously satisfied and must not be penalized.
        if ctx.documents.is_empty() && !has_citations(answer) {
            grounded.score = 1.0;
            grounded.findings.clear();
        }

        let evaluation = Evaluation::new(
            grounded,
            DimensionScore {
                score: payload.complete.score.clamp(0.0, 1.0),
                findings: payload.complete.findings,
            },
            DimensionScore {
                score: payload.useful.score.clamp(0.0, 1.0),
                findings: payload.useful.findings,
            },
        );
        let decision = evaluation.decision(self.config.accept_threshold);

        ctx.record(
            "validator",
            "validate_answer",
            format!("{} chars, {} sources", answer.len(), ctx.documents.len()),
            format!(
                "quality={} decision={:?} g={:.2} c={:.2} u={:.2}",
                evaluation.overall_quality.as_str(),
                decision,
                evaluation.grounded.score,
                evaluation.complete.score,
                evaluation.useful.score
            ),
            started,
        );
        Ok((evaluation, decision))
    }
}

#[async_trait]
impl Agent for Validator {
    fn id(&self) -> &'static str {
        "validator"
    }

    fn name(&self) -> &'static str {
        "Answer Validator"
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _step: &PlanStep,
    ) -> Result<StepOutcome, RagError> {
        let answer = ctx
            .draft
            .as_ref()
            .map(|d| d.answer.clone())
            .unwrap_or_default();
        let (evaluation, decision) = self.validate(ctx, &answer).await?;
        Ok(StepOutcome::Validated {
            evaluation,
            decision,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::OverallQuality;
    use crate::testutil::{fast_config, FailingCompletion, RuleCompletion};

    fn doc(id: &str, content: &str) -> Document {
        Document {
            id: id.to_string(),
            content: content.to_string(),
            source: "kb".to_string(),
            category: None,
            relevance_score: 0.9,
            key_points: vec![],
        }
    }

    #[tokio::test]
    async fn accepts_good_answer() {
        let completion = Arc::new(RuleCompletion::with_default(
            r#"{"grounded": {"score": 0.95, "issues": []}, "complete": {"score": 0.9, "missing": []}, "useful": {"score": 0.92, "issues": []}}"#,
        ));
        let validator = Validator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("return policy?", vec![]);
        ctx.set_documents(vec![doc("POL001", "Returns within 30 days")]);

        let (evaluation, decision) = validator
            .validate(&mut ctx, "Returns are accepted within 30 days [Source 1].")
            .await
            .unwrap();

        assert_eq!(decision, Decision::Accept);
        assert_eq!(evaluation.overall_quality, OverallQuality::Excellent);
    }

    #[tokio::test]
    async fn low_grounding_requests_regeneration() {
        let completion = Arc::new(RuleCompletion::with_default(
            r#"{"grounded": {"score": 0.3, "issues": ["invented a 90 day window"]}, "complete": {"score": 0.9, "missing": []}, "useful": {"score": 0.9, "issues": []}}"#,
        ));
        let validator = Validator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("return policy?", vec![]);
        ctx.set_documents(vec![doc("POL001", "Returns within 30 days")]);

        let (evaluation, decision) = validator
            .validate(&mut ctx, "Returns are accepted within 90 days [Source 1].")
            .await
            .unwrap();

        assert_eq!(decision, Decision::Regenerate);
        assert_eq!(evaluation.grounded.findings.len(), 1);
    }

    #[tokio::test]
    async fn uncited_answer_without_sources_is_not_penalized_for_grounding() {
        let completion = Arc::new(RuleCompletion::with_default(
            r#"{"grounded": {"score": 0.2, "issues": ["no citations"]}, "complete": {"score": 0.8, "missing": []}, "useful": {"score": 0.8, "issues": []}}"#,
        ));
        let validator = Validator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("return policy?", vec![]);

        let (evaluation, decision) = validator
            .validate(&mut ctx, "I don't have the policy details; please share your order type.")
            .await
            .unwrap();

        assert!((evaluation.grounded.score - 1.0).abs() < f32::EPSILON);
        assert!(evaluation.grounded.findings.is_empty());
        assert_eq!(decision, Decision::Accept);
    }

    #[tokio::test]
    async fn provider_outage_is_a_validation_error() {
        let completion = Arc::new(FailingCompletion::always_unavailable());
        let validator = Validator::new(completion, fast_config());
        let mut ctx = ExecutionContext::new("q", vec![]);

        let result = validator.validate(&mut ctx, "answer").await;
        assert!(matches!(result, Err(RagError::Validation(_))));
    }
}
