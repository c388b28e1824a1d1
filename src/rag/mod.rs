// Orchestration controllers and the shared per-query data model.

pub mod agentic;
pub mod context;
pub mod self_rag;
pub mod traditional;
pub mod types;

pub use agentic::AgenticRag;
pub use context::{ExecutionContext, RegenerateHint};
pub use self_rag::SelfRag;
pub use traditional::TraditionalRag;
pub use types::{
    format_trace, Complexity, Decision, DimensionScore, Document, Draft, Evaluation,
    GenerationMode, OverallQuality, Plan, PlanAction, PlanStep, QueryCategory, RagResult,
    RouteInfo, RouteStrategy, TraceRecord,
};
