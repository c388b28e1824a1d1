// Planner agent
// Expands a query + route into an ordered list of executable steps.
// Simple queries get the deterministic single-hop plan without touching the
// completion provider; malformed LLM plans are retried once and then fall
// back to the single-hop plan.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::errors::RagError;
use crate::llm::{parse_json_payload, with_retry, CompletionProvider, CompletionRequest};
use crate::rag::context::ExecutionContext;
use crate::rag::types::{Complexity, Plan, PlanAction, PlanStep, RouteInfo};

use super::{Agent, StepOutcome};

#[derive(Debug, Deserialize)]
struct PlanPayload {
    plan: Vec<PlanStepPayload>,
}

#[derive(Debug, Deserialize)]
struct PlanStepPayload {
    action: String,
    #[serde(default)]
    target: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    multi_query: Option<bool>,
}

pub struct Planner {
    completion: Arc<dyn CompletionProvider>,
    config: EngineConfig,
}

impl Planner {
    pub fn new(completion: Arc<dyn CompletionProvider>, config: EngineConfig) -> Self {
        Self { completion, config }
    }

    fn prompt(query: &str, route: &RouteInfo, context_note: Option<&str>) -> String {
        let note = context_note
            .map(|n| format!("\nExecution so far: {n}\n"))
            .unwrap_or_default();
        format!(
            r#"Create a step-by-step execution plan for this query.

Query: "{query}"
Category: {category}
Complexity: {complexity}
{note}
Available actions:
- retrieve: Get documents from the knowledge base (specify what to retrieve)
- grade: Evaluate document relevance
- generate: Create a text response
- compare: Compare multiple pieces of information
- calculate: Derive a value from retrieved facts
- synthesize: Combine information from multiple sources
- validate: Check answer quality

Respond as JSON:
{{
    "plan": [
        {{"action": "...", "target": "...", "description": "...", "multi_query": true/false}},
        ...
    ]
}}"#,
            category = route.category.as_str(),
            complexity = route.complexity.as_str(),
        )
    }

    /// Parse and validate a plan against the fixed action vocabulary.
    /// Rejects empty plans, unknown actions, and plans with no generation step.
    fn parse_plan(text: &str) -> Result<Plan, String> {
        let payload: PlanPayload =
            parse_json_payload(text).map_err(|err| format!("unparseable plan: {err}"))?;

        if payload.plan.is_empty() {
            return Err("plan has no steps".to_string());
        }

        let mut steps = Vec::with_capacity(payload.plan.len());
        for raw in payload.plan {
            let action = PlanAction::from_str(&raw.action)
                .ok_or_else(|| format!("unknown action: {}", raw.action))?;
            steps.push(PlanStep {
                action,
                target: raw.target,
                description: raw.description,
                multi_query: raw.multi_query.unwrap_or(false),
            });
        }

        let produces_answer = steps.iter().any(|s| {
            matches!(
                s.action,
                PlanAction::Generate | PlanAction::Compare | PlanAction::Synthesize
            )
        });
        if !produces_answer {
            return Err("plan never generates an answer".to_string());
        }

        Ok(Plan::new(steps))
    }

    async fn llm_plan(
        &self,
        query: &str,
        route: &RouteInfo,
        context_note: Option<&str>,
    ) -> Result<Plan, String> {
        let request =
            CompletionRequest::from_user(Self::prompt(query, route, context_note)).expect_json();
        let text = with_retry(&self.config.retry, || self.completion.complete(request.clone()))
            .await
            .map_err(|err| err.to_string())?;
        Self::parse_plan(&text)
    }

    /// Produce a plan for the routed query. Never fails: repeated malformed
    /// plans fall back to the deterministic single-hop plan.
    pub async fn plan(&self, ctx: &mut ExecutionContext, route: &RouteInfo) -> Plan {
        let started = Instant::now();

        let plan = if route.complexity == Complexity::Simple {
            Plan::single_hop(&ctx.query)
        } else {
            match self.llm_plan(&ctx.query, route, None).await {
                Ok(plan) => plan,
                Err(first_err) => {
                    tracing::debug!("plan rejected ({first_err}), retrying once");
                    match self.llm_plan(&ctx.query, route, None).await {
                        Ok(plan) => plan,
                        Err(second_err) => {
                            tracing::warn!(
                                "planning failed twice ({second_err}), falling back to single-hop plan"
                            );
                            Plan::single_hop(&ctx.query)
                        }
                    }
                }
            }
        };

        ctx.record(
            "planner",
            "create_plan",
            ctx.query.clone(),
            format!("{} steps", plan.len()),
            started,
        );
        plan
    }

    /// Re-enter planning mid-run: produce a fresh plan from the updated
    /// context, to replace the remaining unexecuted steps.
    pub async fn replan(&self, ctx: &mut ExecutionContext, route: &RouteInfo, reason: &str) -> Plan {
        let started = Instant::now();
        let note = format!(
            "{} documents gathered, answer draft {}; replanning because: {}",
            ctx.documents.len(),
            if ctx.draft.is_some() { "exists" } else { "missing" },
            reason
        );

        let plan = match self.llm_plan(&ctx.query, route, Some(&note)).await {
            Ok(plan) => plan,
            Err(err) => {
                tracing::warn!("replanning failed ({err}), falling back to single-hop plan");
                Plan::single_hop(&ctx.query)
            }
        };

        ctx.record(
            "planner",
            "replan",
            note,
            format!("{} steps", plan.len()),
            started,
        );
        plan
    }
}

#[async_trait]
impl Agent for Planner {
    fn id(&self) -> &'static str {
        "planner"
    }

    fn name(&self) -> &'static str {
        "Execution Planner"
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _step: &PlanStep,
    ) -> Result<StepOutcome, RagError> {
        let route = ctx.route.clone().unwrap_or_else(RouteInfo::degraded);
        let plan = self.plan(ctx, &route).await;
        let steps = plan.len();
        ctx.plan = plan;
        ctx.cursor = 0;
        Ok(StepOutcome::Planned { steps })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rag::types::QueryCategory;
    use crate::testutil::RuleCompletion;

    fn route(complexity: Complexity) -> RouteInfo {
        RouteInfo {
            category: QueryCategory::Policy,
            complexity,
            requires_retrieval: true,
            strategy: Default::default(),
            reasoning: None,
            confidence: None,
        }
    }

    #[tokio::test]
    async fn simple_route_plans_deterministically() {
        // Provider would return garbage; it must never be called.
        let completion = Arc::new(RuleCompletion::with_default("garbage"));
        let planner = Planner::new(completion.clone(), EngineConfig::default());
        let mut ctx = ExecutionContext::new("What is your return policy?", vec![]);

        let plan = planner.plan(&mut ctx, &route(Complexity::Simple)).await;

        assert_eq!(plan.len(), 3);
        assert_eq!(completion.calls(), 0);
    }

    #[tokio::test]
    async fn complex_route_uses_llm_plan() {
        let completion = Arc::new(RuleCompletion::with_default(
            r#"{"plan": [
                {"action": "retrieve", "target": "electronics return policy"},
                {"action": "retrieve", "target": "clothing return policy"},
                {"action": "grade"},
                {"action": "synthesize", "description": "compare the two policies"}
            ]}"#,
        ));
        let planner = Planner::new(completion, EngineConfig::default());
        let mut ctx = ExecutionContext::new("Compare return policies", vec![]);

        let plan = planner.plan(&mut ctx, &route(Complexity::Complex)).await;

        assert_eq!(plan.len(), 4);
        assert_eq!(plan.steps[0].action, PlanAction::Retrieve);
        assert_eq!(plan.steps[3].action, PlanAction::Synthesize);
    }

    #[tokio::test]
    async fn malformed_plan_falls_back_after_retry() {
        let completion = Arc::new(RuleCompletion::with_default(
            r#"{"plan": [{"action": "summon", "target": "demons"}]}"#,
        ));
        let planner = Planner::new(completion.clone(), EngineConfig::default());
        let mut ctx = ExecutionContext::new("Compare things", vec![]);

        let plan = planner.plan(&mut ctx, &route(Complexity::Complex)).await;

        // one attempt + one retry, then the deterministic fallback
        assert_eq!(completion.calls(), 2);
        assert_eq!(plan.len(), 3);
        assert_eq!(plan.steps[0].action, PlanAction::Retrieve);
    }

    #[test]
    fn plan_without_generation_step_is_rejected() {
        let result = Planner::parse_plan(
            r#"{"plan": [{"action": "retrieve", "target": "x"}, {"action": "grade"}]}"#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn empty_plan_is_rejected() {
        assert!(Planner::parse_plan(r#"{"plan": []}"#).is_err());
    }
}
