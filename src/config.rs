// Engine configuration
// All tunables consumed by the orchestration loops and agents.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Retry policy applied to every external provider call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (transient errors only)
    pub max_retries: u32,
    /// Base delay for exponential backoff, in milliseconds
    pub base_delay_ms: u64,
    /// Hard timeout applied to each individual call, in milliseconds
    pub per_call_timeout_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_delay_ms: 1_000,
            per_call_timeout_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn per_call_timeout(&self) -> Duration {
        Duration::from_millis(self.per_call_timeout_ms)
    }
}

/// Configuration for the RAG engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum generate/evaluate iterations per query
    pub max_iterations: u32,
    /// Minimum relevance score a graded document needs to be usable
    pub relevance_threshold: f32,
    /// Minimum per-dimension evaluation score for an answer to be accepted
    pub accept_threshold: f32,
    /// Documents requested from the retrieval provider on the first pass
    pub top_k: usize,
    /// Documents kept after reranking (when a reranker is wired in)
    pub rerank_top_k: usize,
    /// Concurrency cap for grading fan-out and decomposed retrieval
    pub concurrency_limit: usize,
    /// Wall-clock budget for one whole query, in milliseconds
    pub total_budget_ms: u64,
    /// Retry/timeout policy for provider calls
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            relevance_threshold: 0.5,
            accept_threshold: 0.7,
            top_k: 10,
            rerank_top_k: 3,
            concurrency_limit: 5,
            total_budget_ms: 60_000,
            retry: RetryPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn total_budget(&self) -> Duration {
        Duration::from_millis(self.total_budget_ms)
    }

    /// Validate ranges. Called by the controllers at construction time.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_iterations == 0 {
            return Err("max_iterations must be at least 1".to_string());
        }
        if !(0.0..=1.0).contains(&self.relevance_threshold)
            || !self.relevance_threshold.is_finite()
        {
            return Err(format!(
                "relevance_threshold must be within [0.0, 1.0], got {}",
                self.relevance_threshold
            ));
        }
        if !(0.0..=1.0).contains(&self.accept_threshold) || !self.accept_threshold.is_finite() {
            return Err(format!(
                "accept_threshold must be within [0.0, 1.0], got {}",
                self.accept_threshold
            ));
        }
        if self.top_k == 0 {
            return Err("top_k must be at least 1".to_string());
        }
        if self.concurrency_limit == 0 {
            return Err("concurrency_limit must be at least 1".to_string());
        }
        if self.total_budget_ms == 0 {
            return Err("total_budget_ms must be positive".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_iterations, 3);
        assert_eq!(config.top_k, 10);
        assert!((config.relevance_threshold - 0.5).abs() < f32::EPSILON);
        assert!((config.accept_threshold - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.retry.max_retries, 2);
    }

    #[test]
    fn rejects_zero_iterations() {
        let config = EngineConfig {
            max_iterations: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_out_of_range_thresholds() {
        let config = EngineConfig {
            relevance_threshold: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            accept_threshold: -0.1,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            relevance_threshold: f32::NAN,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_budget_and_fanout() {
        let config = EngineConfig {
            total_budget_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = EngineConfig {
            concurrency_limit: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
