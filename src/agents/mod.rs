// Agent components
// Closed set of capabilities dispatched by the orchestration loops.
// No agent ever invokes another agent; the loop is the single authority.

pub mod coordinator;
pub mod generator;
pub mod grader;
pub mod planner;
pub mod router;
pub mod validator;

use async_trait::async_trait;

use crate::errors::RagError;
use crate::rag::context::ExecutionContext;
use crate::rag::types::{Decision, Evaluation, PlanStep, RouteInfo};

pub use coordinator::RetrievalCoordinator;
pub use generator::Generator;
pub use grader::{GradeReport, Grader};
pub use planner::Planner;
pub use router::Router;
pub use validator::Validator;

/// Synchronous, explicit result of one agent step, consumed directly by the
/// loop. Decisions travel as return values, never through shared state.
#[derive(Debug, Clone)]
pub enum StepOutcome {
    Routed(RouteInfo),
    Planned { steps: usize },
    Retrieved { staged: usize },
    Graded { kept: usize },
    Generated,
    Validated {
        evaluation: Evaluation,
        decision: Decision,
    },
    Skipped(&'static str),
}

/// Capability interface implemented by every agent.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Stable identifier used in trace records
    fn id(&self) -> &'static str;

    /// Human-readable name for display
    fn name(&self) -> &'static str {
        self.id()
    }

    /// Execute the agent against the shared context for one plan step.
    async fn execute(
        &self,
        ctx: &mut ExecutionContext,
        step: &PlanStep,
    ) -> Result<StepOutcome, RagError>;
}
