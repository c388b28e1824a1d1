use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::types::CompletionRequest;

/// Errors surfaced at the completion/retrieval provider boundary.
///
/// Providers signal failures as values, never panics, so the orchestration
/// loops can decide on fallback behaviour from the error kind alone.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("rate limited")]
    RateLimited,
    #[error("call timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed response: {0}")]
    MalformedResponse(String),
    #[error("provider unavailable: {0}")]
    Unavailable(String),
}

impl ProviderError {
    /// Transient errors may succeed on retry; structural ones never will.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::Timeout(_) | ProviderError::Unavailable(_)
        )
    }
}

/// Text-completion capability consumed by all agents.
///
/// Returns free text; callers that asked for JSON extract it with
/// [`parse_json_payload`].
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<String, ProviderError>;
}

/// Extract and deserialize the first JSON object embedded in LLM output.
///
/// Tries a direct parse first, then falls back to the outermost `{...}`
/// span, since models routinely wrap JSON in prose or code fences.
pub fn parse_json_payload<T: DeserializeOwned>(text: &str) -> Result<T, ProviderError> {
    let trimmed = text.trim();

    if let Ok(value) = serde_json::from_str::<T>(trimmed) {
        return Ok(value);
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}')) {
        if start < end {
            if let Ok(value) = serde_json::from_str::<T>(&trimmed[start..=end]) {
                return Ok(value);
            }
        }
    }

    // truncate by chars, not bytes: the preview must never split a
    // multibyte character
    let preview: String = trimmed.chars().take(120).collect();
    Err(ProviderError::MalformedResponse(format!(
        "expected a JSON object, got: {preview}"
    )))
}
