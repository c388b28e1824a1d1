// Router agent
// Classifies a query into category, complexity tier, and retrieval need.
// Runs once per query; classification failure degrades to a default route
// instead of aborting.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::config::EngineConfig;
use crate::errors::RagError;
use crate::llm::{parse_json_payload, with_retry, CompletionProvider, CompletionRequest};
use crate::rag::context::ExecutionContext;
use crate::rag::types::{Complexity, PlanStep, QueryCategory, RouteInfo, RouteStrategy};

use super::{Agent, StepOutcome};

#[derive(Debug, Deserialize)]
struct RoutePayload {
    category: String,
    complexity: String,
    requires_retrieval: bool,
    #[serde(default)]
    suggested_strategy: Option<String>,
    #[serde(default)]
    reasoning: Option<String>,
    #[serde(default)]
    confidence: Option<f32>,
}

pub struct Router {
    completion: Arc<dyn CompletionProvider>,
    config: EngineConfig,
}

impl Router {
    pub fn new(completion: Arc<dyn CompletionProvider>, config: EngineConfig) -> Self {
        Self { completion, config }
    }

    fn prompt(query: &str) -> String {
        format!(
            r#"Analyze this customer support query and classify it.

Query: "{query}"

Determine:
1. Category: product_info, policy, order_tracking, technical_support, general_conversation, out_of_scope
2. Complexity: simple (straightforward lookup), medium (requires some reasoning), complex (multi-step or comparison)
3. Whether retrieval from the knowledge base is needed
4. Suggested strategy: direct (single retrieval), multi_hop (multiple retrievals), conversational (no retrieval needed)

Respond in JSON format:
{{
    "category": "...",
    "complexity": "simple/medium/complex",
    "requires_retrieval": true/false,
    "suggested_strategy": "...",
    "reasoning": "brief explanation",
    "confidence": 0.0-1.0
}}"#
        )
    }

    /// Classify the query. Never fails: malformed or unavailable
    /// classification degrades to the default route.
    pub async fn route(&self, ctx: &mut ExecutionContext) -> RouteInfo {
        let started = Instant::now();
        let request = CompletionRequest::from_user(Self::prompt(&ctx.query)).expect_json();

        let route = match with_retry(&self.config.retry, || {
            self.completion.complete(request.clone())
        })
        .await
        .and_then(|text| parse_json_payload::<RoutePayload>(&text))
        {
            Ok(payload) => RouteInfo {
                category: QueryCategory::from_str(&payload.category),
                complexity: Complexity::from_str(&payload.complexity),
                requires_retrieval: payload.requires_retrieval,
                strategy: payload
                    .suggested_strategy
                    .as_deref()
                    .map(RouteStrategy::from_str)
                    .unwrap_or_default(),
                reasoning: payload.reasoning,
                confidence: payload.confidence,
            },
            Err(err) => {
                tracing::warn!("router classification failed ({err}), using degraded route");
                RouteInfo::degraded()
            }
        };

        ctx.record(
            "router",
            "route_query",
            ctx.query.clone(),
            format!(
                "category={} complexity={} retrieval={}",
                route.category.as_str(),
                route.complexity.as_str(),
                route.requires_retrieval
            ),
            started,
        );
        ctx.route = Some(route.clone());
        route
    }
}

#[async_trait]
impl Agent for Router {
    fn id(&self) -> &'static str {
        "router"
    }

    fn name(&self) -> &'static str {
        "Query Router"
    }

    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        _step: &PlanStep,
    ) -> Result<StepOutcome, RagError> {
        let route = self.route(ctx).await;
        Ok(StepOutcome::Routed(route))
    }
}
