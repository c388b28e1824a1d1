// Core data model shared by the agents and the orchestration loops.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Query categories the router classifies into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryCategory {
    ProductInfo,
    Policy,
    OrderTracking,
    TechnicalSupport,
    GeneralConversation,
    OutOfScope,
}

impl QueryCategory {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "product_info" => QueryCategory::ProductInfo,
            "policy" => QueryCategory::Policy,
            "order_tracking" => QueryCategory::OrderTracking,
            "technical_support" => QueryCategory::TechnicalSupport,
            "out_of_scope" => QueryCategory::OutOfScope,
            _ => QueryCategory::GeneralConversation,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueryCategory::ProductInfo => "product_info",
            QueryCategory::Policy => "policy",
            QueryCategory::OrderTracking => "order_tracking",
            QueryCategory::TechnicalSupport => "technical_support",
            QueryCategory::GeneralConversation => "general_conversation",
            QueryCategory::OutOfScope => "out_of_scope",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Simple,
    Medium,
    Complex,
}

impl Complexity {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "medium" => Complexity::Medium,
            "complex" => Complexity::Complex,
            _ => Complexity::Simple,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Simple => "simple",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RouteStrategy {
    #[default]
    Direct,
    MultiHop,
    Conversational,
}

impl RouteStrategy {
    pub fn from_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "multi_hop" | "comparison" => RouteStrategy::MultiHop,
            "conversational" => RouteStrategy::Conversational,
            _ => RouteStrategy::Direct,
        }
    }
}

/// Router output. Produced once per query, immutable afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteInfo {
    pub category: QueryCategory,
    pub complexity: Complexity,
    pub requires_retrieval: bool,
    pub strategy: RouteStrategy,
    pub reasoning: Option<String>,
    pub confidence: Option<f32>,
}

impl RouteInfo {
    /// Safe default used when classification fails: treat the query as a
    /// simple conversational one that still gets a retrieval attempt.
    pub fn degraded() -> Self {
        Self {
            category: QueryCategory::GeneralConversation,
            complexity: Complexity::Simple,
            requires_retrieval: true,
            strategy: RouteStrategy::Direct,
            reasoning: None,
            confidence: None,
        }
    }
}

/// Fixed action vocabulary for plan steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlanAction {
    Retrieve,
    Grade,
    Generate,
    Compare,
    Calculate,
    Validate,
    Synthesize,
}

impl PlanAction {
    /// Parse against the fixed vocabulary; unknown actions are rejected.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "retrieve" => Some(PlanAction::Retrieve),
            "grade" => Some(PlanAction::Grade),
            "generate" => Some(PlanAction::Generate),
            "compare" => Some(PlanAction::Compare),
            "calculate" => Some(PlanAction::Calculate),
            "validate" => Some(PlanAction::Validate),
            "synthesize" => Some(PlanAction::Synthesize),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanAction::Retrieve => "retrieve",
            PlanAction::Grade => "grade",
            PlanAction::Generate => "generate",
            PlanAction::Compare => "compare",
            PlanAction::Calculate => "calculate",
            PlanAction::Validate => "validate",
            PlanAction::Synthesize => "synthesize",
        }
    }
}

/// One executable step of a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: PlanAction,
    /// Literal search target or reference to prior output; defaults to the
    /// original query when absent.
    pub target: Option<String>,
    pub description: Option<String>,
    /// When set, the retrieval coordinator decomposes the target into
    /// sub-queries instead of issuing it verbatim.
    pub multi_query: bool,
}

impl PlanStep {
    pub fn retrieve(target: impl Into<String>) -> Self {
        Self {
            action: PlanAction::Retrieve,
            target: Some(target.into()),
            description: None,
            multi_query: false,
        }
    }

    pub fn simple(action: PlanAction) -> Self {
        Self {
            action,
            target: None,
            description: None,
            multi_query: false,
        }
    }
}

/// An ordered sequence of plan steps. May be regenerated mid-run; executed
/// steps are never revisited.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}

impl Plan {
    pub fn new(steps: Vec<PlanStep>) -> Self {
        Self { steps }
    }

    /// The deterministic retrieve→grade→generate plan for simple queries.
    pub fn single_hop(query: &str) -> Self {
        Self::new(vec![
            PlanStep::retrieve(query),
            PlanStep::simple(PlanAction::Grade),
            PlanStep::simple(PlanAction::Generate),
        ])
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// A graded document, eligible for generation.
///
/// Only the grader constructs these; `relevance_score` is the grader's
/// verdict, not the retrieval provider's similarity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub source: String,
    pub category: Option<String>,
    pub relevance_score: f32,
    pub key_points: Vec<String>,
}

/// Generation mode selected by the loop from plan shape and context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenerationMode {
    /// Single merged-context answer with [Source N] citations
    Direct,
    /// Cross-source comparison/aggregation for multi-hop plans
    Synthesis,
    /// No usable documents: partial answer plus explicit gaps, no citations
    Clarification,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationMode::Direct => "direct",
            GenerationMode::Synthesis => "synthesis",
            GenerationMode::Clarification => "clarification",
        }
    }
}

/// A generated answer draft, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Draft {
    pub answer: String,
    /// 1-based [Source N] indices cited in the answer
    pub cited_sources: Vec<usize>,
    /// Mean relevance of the cited documents (0.0 when nothing is cited)
    pub confidence: f32,
    pub mode: GenerationMode,
}

/// One scored evaluation dimension with its supporting findings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionScore {
    pub score: f32,
    #[serde(default)]
    pub findings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverallQuality {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl OverallQuality {
    /// Deterministic aggregation of the three dimension scores: the minimum
    /// score decides the label. Monotone in each dimension.
    pub fn from_scores(grounded: f32, complete: f32, useful: f32) -> Self {
        let min = grounded.min(complete).min(useful);
        if min >= 0.9 {
            OverallQuality::Excellent
        } else if min >= 0.7 {
            OverallQuality::Good
        } else if min >= 0.5 {
            OverallQuality::Fair
        } else {
            OverallQuality::Poor
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OverallQuality::Poor => "poor",
            OverallQuality::Fair => "fair",
            OverallQuality::Good => "good",
            OverallQuality::Excellent => "excellent",
        }
    }
}

/// Corrective action proposed by the validator, consumed by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accept,
    Regenerate,
    RetrieveMore,
    Rephrase,
}

/// Three-dimensional answer evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evaluation {
    /// Every claim traceable to a source; findings list unsupported claims
    pub grounded: DimensionScore,
    /// Question fully answered; findings list missing aspects
    pub complete: DimensionScore,
    /// Actually helpful to the user; findings list usefulness issues
    pub useful: DimensionScore,
    pub overall_quality: OverallQuality,
}

impl Evaluation {
    pub fn new(grounded: DimensionScore, complete: DimensionScore, useful: DimensionScore) -> Self {
        let overall_quality =
            OverallQuality::from_scores(grounded.score, complete.score, useful.score);
        Self {
            grounded,
            complete,
            useful,
            overall_quality,
        }
    }

    /// Derive the next action. Priority when several dimensions fail:
    /// grounded > complete > useful, since ungrounded content is a
    /// correctness defect.
    pub fn decision(&self, accept_threshold: f32) -> Decision {
        if self.grounded.score >= accept_threshold
            && self.complete.score >= accept_threshold
            && self.useful.score >= accept_threshold
        {
            Decision::Accept
        } else if self.grounded.score < accept_threshold {
            Decision::Regenerate
        } else if self.complete.score < accept_threshold {
            Decision::RetrieveMore
        } else {
            Decision::Rephrase
        }
    }

    pub fn is_acceptable(&self, accept_threshold: f32) -> bool {
        self.decision(accept_threshold) == Decision::Accept
    }
}

/// One append-only trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceRecord {
    pub agent: String,
    pub action: String,
    pub input_summary: String,
    pub output_summary: String,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Render a trace as a human-readable summary, one line per record.
pub fn format_trace(trace: &[TraceRecord]) -> String {
    let mut lines = vec!["Execution trace:".to_string()];
    for record in trace {
        lines.push(format!(
            "  [{}] {}: {} ({} ms) -> {}",
            record.timestamp.format("%H:%M:%S%.3f"),
            record.agent,
            record.action,
            record.duration_ms,
            record.output_summary
        ));
    }
    lines.join("\n")
}

/// Terminal output of one query. The caller always receives one of these;
/// failures degrade into it rather than surfacing as errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagResult {
    pub answer: String,
    /// Documents consulted for the final answer; all scored at or above the
    /// relevance threshold when they were used
    pub sources: Vec<Document>,
    pub evaluation: Option<Evaluation>,
    pub route: Option<RouteInfo>,
    pub iterations: u32,
    /// False when the self-check could not run or the loop fell back
    pub validated: bool,
    pub trace: Vec<TraceRecord>,
}

impl RagResult {
    /// Inspection surface for observability tooling.
    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }
}
