// Per-query execution context.
// Exclusively owned by one orchestration loop for the query's lifetime;
// discarded once the result is returned.

use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::llm::ChatMessage;
use crate::retrieval::ScoredDocument;

use super::types::{Document, Draft, Plan, RouteInfo, TraceRecord};

/// Hint carried into the next generation attempt after a rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegenerateHint {
    /// Validator saw unsupported claims: instruct stricter grounding
    StricterGrounding,
    /// Validator saw low usefulness: reframe towards the user's question
    Rephrase,
}

/// The single mutable object threaded through one query's lifetime.
#[derive(Debug)]
pub struct ExecutionContext {
    pub query_id: Uuid,
    pub query: String,
    pub history: Vec<ChatMessage>,

    pub route: Option<RouteInfo>,
    pub plan: Plan,
    /// Index of the next unexecuted plan step; replanning replaces steps
    /// from here on and never rewinds
    pub cursor: usize,

    /// Raw retrieval output staged for grading
    pub retrieved: Vec<ScoredDocument>,
    /// Graded documents eligible for generation, highest relevance first
    pub documents: Vec<Document>,

    pub draft: Option<Draft>,
    pub regenerate_hint: Option<RegenerateHint>,

    pub iterations: u32,
    started: Instant,
    trace: Vec<TraceRecord>,
}

impl ExecutionContext {
    pub fn new(query: impl Into<String>, history: Vec<ChatMessage>) -> Self {
        Self {
            query_id: Uuid::new_v4(),
            query: query.into(),
            history,
            route: None,
            plan: Plan::default(),
            cursor: 0,
            retrieved: Vec::new(),
            documents: Vec::new(),
            draft: None,
            regenerate_hint: None,
            iterations: 0,
            started: Instant::now(),
            trace: Vec::new(),
        }
    }

    /// Append a trace record. The trace is append-only; nothing ever
    /// rewinds or replaces prior entries.
    pub fn record(
        &mut self,
        agent: &str,
        action: &str,
        input_summary: impl Into<String>,
        output_summary: impl Into<String>,
        started: Instant,
    ) {
        self.trace.push(TraceRecord {
            agent: agent.to_string(),
            action: action.to_string(),
            input_summary: input_summary.into(),
            output_summary: output_summary.into(),
            duration_ms: started.elapsed().as_millis() as u64,
            timestamp: Utc::now(),
        });
    }

    pub fn trace(&self) -> &[TraceRecord] {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Vec<TraceRecord> {
        std::mem::take(&mut self.trace)
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// True once the per-query wall-clock budget is spent.
    pub fn budget_exceeded(&self, config: &EngineConfig) -> bool {
        self.started.elapsed() >= config.total_budget()
    }

    /// Merge freshly retrieved documents into the staging area, dropping
    /// duplicate ids. First occurrence wins.
    pub fn stage_retrieved(&mut self, incoming: Vec<ScoredDocument>) -> usize {
        let mut added = 0;
        for doc in incoming {
            if self.retrieved.iter().any(|d| d.id == doc.id)
                || self.documents.iter().any(|d| d.id == doc.id)
            {
                continue;
            }
            self.retrieved.push(doc);
            added += 1;
        }
        added
    }

    /// Replace graded documents, keeping them ordered by relevance.
    pub fn set_documents(&mut self, mut documents: Vec<Document>) {
        documents.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        self.documents = documents;
    }

    /// Append graded documents from a follow-up retrieval, deduplicated,
    /// keeping relevance ordering.
    pub fn extend_documents(&mut self, incoming: Vec<Document>) -> usize {
        let mut added = 0;
        for doc in incoming {
            if self.documents.iter().any(|d| d.id == doc.id) {
                continue;
            }
            self.documents.push(doc);
            added += 1;
        }
        self.documents.sort_by(|a, b| {
            b.relevance_score
                .partial_cmp(&a.relevance_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        added
    }

    /// Replace every unexecuted step with a new plan, preserving executed
    /// steps and their outputs.
    pub fn replace_remaining_plan(&mut self, new_plan: Plan) {
        self.plan.steps.truncate(self.cursor);
        self.plan.steps.extend(new_plan.steps);
    }
}
