// Agentic-RAG controller
// Full state machine: route, plan, execute plan steps by action tag,
// validate, and adapt. The loop is the single authority; agents never call
// each other, and every decision arrives as an explicit return value.

use std::sync::Arc;
use std::time::Instant;

use crate::agents::{
    Agent, Generator, Grader, Planner, RetrievalCoordinator, Router, StepOutcome, Validator,
};
use crate::config::EngineConfig;
use crate::errors::RagError;
use crate::llm::{ChatMessage, CompletionProvider};
use crate::retrieval::{Reranker, RetrievalProvider};

use super::context::{ExecutionContext, RegenerateHint};
use super::self_rag::finish;
use super::types::{Decision, Evaluation, PlanAction, PlanStep, QueryCategory, RagResult};

const CONVERSATIONAL_GREETING: &str = "Hello! I'm your customer support assistant. I can help you with:
- Product information
- Return and refund policies
- Shipping information
- Order tracking
- Account questions
- Technical support

How can I assist you today?";

const OUT_OF_SCOPE_ANSWER: &str = "I'm sorry, that question is outside what I can help with. \
I handle customer support topics: product information, return and refund policies, shipping, \
order tracking, and technical support. Is there anything in those areas I can help you with?";

const FALLBACK_ANSWER: &str = "I'm sorry, I wasn't able to put together a reliable answer to \
your question right now. I can help with product information, return and refund policies, \
shipping, order tracking, and technical support. Could you try rephrasing your question?";

/// Multi-agent pipeline: route, plan, execute, validate, adapt.
pub struct AgenticRag {
    router: Router,
    planner: Planner,
    coordinator: RetrievalCoordinator,
    grader: Grader,
    generator: Generator,
    validator: Validator,
    config: EngineConfig,
}

impl AgenticRag {
    pub fn new(
        completion: Arc<dyn CompletionProvider>,
        retrieval: Arc<dyn RetrievalProvider>,
        reranker: Option<Arc<dyn Reranker>>,
        config: EngineConfig,
    ) -> Self {
        Self {
            router: Router::new(completion.clone(), config.clone()),
            planner: Planner::new(completion.clone(), config.clone()),
            coordinator: RetrievalCoordinator::new(
                retrieval,
                completion.clone(),
                reranker,
                config.clone(),
            ),
            grader: Grader::new(completion.clone(), config.clone()),
            generator: Generator::new(completion.clone(), config.clone()),
            validator: Validator::new(completion, config.clone()),
            config,
        }
    }

    /// Map a plan action to the agent that executes it. Calculation folds
    /// into generation; validation is the loop's own phase, never a plan
    /// step.
    fn agent_for(&self, action: PlanAction) -> Option<&dyn Agent> {
        match action {
            PlanAction::Retrieve => Some(&self.coordinator),
            PlanAction::Grade => Some(&self.grader),
            PlanAction::Generate | PlanAction::Compare | PlanAction::Synthesize => {
                Some(&self.generator)
            }
            PlanAction::Calculate | PlanAction::Validate => None,
        }
    }

    /// Execute every remaining plan step in order, dispatching on the
    /// step's action tag through the capability interface. Returns an error
    /// only for generation failure, which is fatal to the iteration.
    async fn execute_plan(&self, ctx: &mut ExecutionContext) -> Result<(), RagError> {
        while ctx.cursor < ctx.plan.len() {
            if ctx.budget_exceeded(&self.config) {
                break;
            }
            let step = ctx.plan.steps[ctx.cursor].clone();
            ctx.cursor += 1;

            let Some(agent) = self.agent_for(step.action) else {
                let started = Instant::now();
                ctx.record(
                    "agentic_rag",
                    "skip_step",
                    step.action.as_str(),
                    "handled by the loop",
                    started,
                );
                continue;
            };

            match agent.execute(ctx, &step).await? {
                StepOutcome::Retrieved { staged } => {
                    tracing::debug!(step = step.action.as_str(), staged, "step finished");
                }
                StepOutcome::Graded { kept } => {
                    tracing::debug!(step = step.action.as_str(), kept, "step finished");
                }
                outcome => {
                    tracing::debug!(step = step.action.as_str(), ?outcome, "step finished");
                }
            }
        }
        Ok(())
    }

    /// Answer a query. Always returns a result with a non-empty answer;
    /// every failure path degrades instead of surfacing an error.
    pub async fn query(&self, query: impl Into<String>, history: Vec<ChatMessage>) -> RagResult {
        let mut ctx = ExecutionContext::new(query, history);
        tracing::info!(query_id = %ctx.query_id, "agentic-rag query started");

        let route = self.router.route(&mut ctx).await;

        if route.category == QueryCategory::OutOfScope {
            tracing::info!(query_id = %ctx.query_id, "query out of scope, short-circuiting");
            return finish(ctx, OUT_OF_SCOPE_ANSWER.to_string(), None, false);
        }

        if !route.requires_retrieval {
            let started = Instant::now();
            ctx.record(
                "agentic_rag",
                "conversational",
                ctx.query.clone(),
                "canned capabilities greeting",
                started,
            );
            return finish(ctx, CONVERSATIONAL_GREETING.to_string(), None, false);
        }

        ctx.plan = self.planner.plan(&mut ctx, &route).await;
        ctx.cursor = 0;

        let mut best: Option<(String, Evaluation)> = None;
        let mut retrieve_more_count: u32 = 0;

        while ctx.iterations < self.config.max_iterations {
            if ctx.budget_exceeded(&self.config) {
                tracing::warn!(query_id = %ctx.query_id, "wall-clock budget exhausted");
                break;
            }
            ctx.iterations += 1;

            if let Err(err) = self.execute_plan(&mut ctx).await {
                tracing::error!(query_id = %ctx.query_id, "plan execution failed: {err}");
                return self.fallback(ctx, best);
            }

            let Some(answer) = ctx.draft.as_ref().map(|d| d.answer.clone()) else {
                tracing::warn!(query_id = %ctx.query_id, "plan produced no answer");
                return self.fallback(ctx, best);
            };

            let (evaluation, decision) = match self.validator.validate(&mut ctx, &answer).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    tracing::warn!(
                        query_id = %ctx.query_id,
                        "self-check unavailable ({err}), accepting answer unvalidated"
                    );
                    return finish(ctx, answer, None, false);
                }
            };

            let improves = best
                .as_ref()
                .map(|(_, e)| evaluation.overall_quality >= e.overall_quality)
                .unwrap_or(true);
            if improves {
                best = Some((answer.clone(), evaluation.clone()));
            }

            match decision {
                Decision::Accept => {
                    tracing::info!(
                        query_id = %ctx.query_id,
                        iterations = ctx.iterations,
                        "answer accepted"
                    );
                    return finish(ctx, answer, Some(evaluation), true);
                }
                Decision::Regenerate => {
                    ctx.regenerate_hint = Some(RegenerateHint::StricterGrounding);
                    self.queue_regeneration(&mut ctx);
                }
                Decision::Rephrase => {
                    ctx.regenerate_hint = Some(RegenerateHint::Rephrase);
                    self.queue_regeneration(&mut ctx);
                }
                Decision::RetrieveMore => {
                    retrieve_more_count += 1;
                    if retrieve_more_count == 1 {
                        // first miss: expand retrieval in place and regenerate
                        let query = ctx.query.clone();
                        let staged = self.coordinator.retrieve_expanded(&mut ctx, &query).await;
                        if staged > 0 {
                            self.grader.grade_staged(&mut ctx).await;
                        }
                        self.queue_regeneration(&mut ctx);
                    } else {
                        // still incomplete: re-enter planning with the
                        // accumulated context, replacing unexecuted steps
                        let new_plan = self
                            .planner
                            .replan(&mut ctx, &route, "answer incomplete after expanded retrieval")
                            .await;
                        ctx.replace_remaining_plan(new_plan);
                    }
                }
            }
        }

        match best {
            Some((answer, evaluation)) => finish(ctx, answer, Some(evaluation), false),
            None => self.fallback(ctx, None),
        }
    }

    /// Queue a single generation step so the next iteration re-generates
    /// from the (possibly extended) context.
    fn queue_regeneration(&self, ctx: &mut ExecutionContext) {
        let step = ctx
            .plan
            .steps
            .iter()
            .rev()
            .find(|s| {
                matches!(
                    s.action,
                    PlanAction::Generate | PlanAction::Compare | PlanAction::Synthesize
                )
            })
            .cloned()
            .unwrap_or_else(|| PlanStep::simple(PlanAction::Generate));
        ctx.plan.steps.push(step);
    }

    fn fallback(&self, mut ctx: ExecutionContext, best: Option<(String, Evaluation)>) -> RagResult {
        match best {
            Some((answer, evaluation)) => finish(ctx, answer, Some(evaluation), false),
            None => {
                // sources that never produced an answer are not reported
                ctx.documents.clear();
                finish(ctx, FALLBACK_ANSWER.to_string(), None, false)
            }
        }
    }
}
