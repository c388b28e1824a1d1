// Self-RAG controller
// Reduced state machine: a retrieval-need gate replaces routing and
// planning, followed by a bounded generate -> evaluate -> branch cycle.
// The controller is the only caller of the agents; decisions travel as
// return values.

use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;

use crate::agents::{Generator, Grader, RetrievalCoordinator, Validator};
use crate::config::EngineConfig;
use crate::llm::{
    parse_json_payload, with_retry, ChatMessage, CompletionProvider, CompletionRequest,
};
use crate::retrieval::{Reranker, RetrievalProvider};

use super::context::{ExecutionContext, RegenerateHint};
use super::types::{Decision, Evaluation, GenerationMode, PlanStep, RagResult, TraceRecord};

const FALLBACK_ANSWER: &str = "I'm sorry, I wasn't able to put together a reliable answer to \
your question right now. I can help with product information, return and refund policies, \
shipping, order tracking, and technical support. Could you try rephrasing your question?";

#[derive(Debug, Deserialize)]
struct GatePayload {
    needs_retrieval: bool,
    #[serde(default)]
    reasoning: Option<String>,
}

/// Iterative self-checking pipeline: gate, retrieve, grade, then generate
/// and self-evaluate until the answer is accepted or the budget runs out.
pub struct SelfRag {
    completion: Arc<dyn CompletionProvider>,
    coordinator: RetrievalCoordinator,
    grader: Grader,
    generator: Generator,
    validator: Validator,
    config: EngineConfig,
}

impl SelfRag {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        retrieval: Arc<dyn RetrievalProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            coordinator: RetrievalCoordinator::new(
                retrieval,
                completion.clone(),
                reranker,
                config.clone(),
            ),
            grader: Grader::new(completion.clone(), config.clone()),
            generator: Generator::new(completion.clone(), config.clone()),
            validator: Validator::new(completion.clone(), config.clone()),
            completion,
            config,
        }
    }

    fn gate_prompt(query: &str) -> String {
        format!(
            r#"Analyze this customer query and determine if external knowledge retrieval is needed.

Query: "{query}"

Some queries can be answered with general knowledge or are just greetings/small talk.
Others require specific information from our knowledge base.

Respond in JSON format:
{{
    "needs_retrieval": true/false,
    "reasoning": "explanation"
}}"#
        )
    }

    /// Decide whether the query needs the knowledge base at all.
    /// Failure degrades to retrieving, the safer default.
    async fn should_retrieve(&self, ctx: &mut ExecutionContext) -> bool {
        let started = Instant::now();
        let request = CompletionRequest::from_user(Self::gate_prompt(&ctx.query)).expect_json();

        let (needs_retrieval, reasoning) = match with_retry(&self.config.retry, || {
            self.completion.complete(request.clone())
        })
        .await
        .and_then(|text| parse_json_payload::<GatePayload>(&text))
        {
            Ok(payload) => (payload.needs_retrieval, payload.reasoning),
            Err(err) => {
                tracing::warn!("retrieval gate failed ({err}), defaulting to retrieval");
                (true, None)
            }
        };

        ctx.record(
            "self_rag",
            "retrieval_decision",
            ctx.query.clone(),
            format!(
                "needs_retrieval={needs_retrieval}{}",
                reasoning.map(|r| format!(" ({r})")).unwrap_or_default()
            ),
            started,
        );
        needs_retrieval
    }

    /// First retrieval pass plus grading, with one broadened follow-up when
    /// everything retrieved graded out below the threshold.
    async fn gather_context(&self, ctx: &mut ExecutionContext) {
        let step = PlanStep::retrieve(ctx.query.clone());
        let staged = self.coordinator.retrieve(ctx, &step).await;
        self.grader.grade_staged(ctx).await;

        if staged > 0 && ctx.documents.is_empty() {
            let broadened = self.coordinator.retrieve_broadened(ctx).await;
            if broadened > 0 {
                self.grader.grade_staged(ctx).await;
            }
        }
    }

    /// Answer a query. Always returns a result with a non-empty answer;
    /// every failure path degrades instead of surfacing an error.
    pub async fn query(&self, query: impl Into<String>, history: Vec<ChatMessage>) -> RagResult {
        let mut ctx = ExecutionContext::new(query, history);
        tracing::info!(query_id = %ctx.query_id, "self-rag query started");

        let needs_retrieval = self.should_retrieve(&mut ctx).await;
        if needs_retrieval {
            self.gather_context(&mut ctx).await;
        }

        let mut best: Option<(String, Evaluation)> = None;

        while ctx.iterations < self.config.max_iterations {
            if ctx.budget_exceeded(&self.config) {
                tracing::warn!(query_id = %ctx.query_id, "wall-clock budget exhausted");
                break;
            }
            ctx.iterations += 1;

            let mode = if needs_retrieval && ctx.documents.is_empty() {
                GenerationMode::Clarification
            } else {
                GenerationMode::Direct
            };

            let draft = match self.generator.generate(&mut ctx, mode).await {
                Ok(draft) => draft,
                Err(err) => {
                    tracing::error!(query_id = %ctx.query_id, "generation failed: {err}");
                    return self.fallback(ctx, best);
                }
            };

            let (evaluation, decision) =
                match self.validator.validate(&mut ctx, &draft.answer).await {
                    Ok(outcome) => outcome,
                    Err(err) => {
                        tracing::warn!(
                            query_id = %ctx.query_id,
                            "self-check unavailable ({err}), accepting answer unvalidated"
                        );
                        return finish(ctx, draft.answer, None, false);
                    }
                };

            let improves = best
                .as_ref()
                .map(|(_, e)| evaluation.overall_quality >= e.overall_quality)
                .unwrap_or(true);
            if improves {
                best = Some((draft.answer.clone(), evaluation.clone()));
            }

            match decision {
                Decision::Accept => {
                    tracing::info!(
                        query_id = %ctx.query_id,
                        iterations = ctx.iterations,
                        "answer accepted"
                    );
                    return finish(ctx, draft.answer, Some(evaluation), true);
                }
                Decision::Regenerate => {
                    ctx.regenerate_hint = Some(RegenerateHint::StricterGrounding);
                }
                Decision::Rephrase => {
                    ctx.regenerate_hint = Some(RegenerateHint::Rephrase);
                }
                Decision::RetrieveMore => {
                    let query = ctx.query.clone();
                    let staged = self.coordinator.retrieve_expanded(&mut ctx, &query).await;
                    if staged > 0 {
                        self.grader.grade_staged(&mut ctx).await;
                    }
                }
            }
        }

        // Iterations or budget ran out: return the best rejected answer.
        match best {
            Some((answer, evaluation)) => finish(ctx, answer, Some(evaluation), false),
            None => self.fallback(ctx, None),
        }
    }

    fn fallback(&self, ctx: ExecutionContext, best: Option<(String, Evaluation)>) -> RagResult {
        match best {
            Some((answer, evaluation)) => finish(ctx, answer, Some(evaluation), false),
            None => finish(ctx, FALLBACK_ANSWER.to_string(), None, false),
        }
    }
}

/// Assemble the terminal result and discard the context.
pub(super) fn finish(
    mut ctx: ExecutionContext,
    answer: String,
    evaluation: Option<Evaluation>,
    validated: bool,
) -> RagResult {
    let trace: Vec<TraceRecord> = ctx.take_trace();
    RagResult {
        answer,
        sources: std::mem::take(&mut ctx.documents),
        evaluation,
        route: ctx.route.take(),
        iterations: ctx.iterations,
        validated,
        trace,
    }
}
