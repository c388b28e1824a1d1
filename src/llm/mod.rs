pub mod provider;
pub mod retry;
pub mod types;

pub use provider::{parse_json_payload, CompletionProvider, ProviderError};
pub use retry::with_retry;
pub use types::{ChatMessage, CompletionRequest};
