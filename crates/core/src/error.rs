//! Error types for the ironloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for all ironloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Compaction errors ---
    #[error("Compaction error: {0}")]
    Compact(#[from] CompactError),

    // --- Fatal pre-run failures ---
    #[error("Setup error: {0}")]
    Setup(String),

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Content rejected by provider filter: {0}")]
    ContentFilter(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ProviderError {
    /// Whether retrying the same request may succeed.
    ///
    /// Transient network failures, timeouts, interrupted streams, HTTP 5xx,
    /// and rate limits are retryable. Auth, unknown-model, and content-filter
    /// rejections are not.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. }
            | Self::Timeout(_)
            | Self::Network(_)
            | Self::StreamInterrupted(_) => true,
            Self::ApiError { status_code, .. } => {
                *status_code == 429 || (500..=599).contains(status_code)
            }
            _ => false,
        }
    }

    /// Whether the provider signalled rate limiting specifically.
    ///
    /// Rate limits get a longer backoff schedule than other transient errors.
    pub fn is_rate_limited(&self) -> bool {
        matches!(
            self,
            Self::RateLimited { .. }
                | Self::ApiError {
                    status_code: 429,
                    ..
                }
        )
    }
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name}: {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

#[derive(Debug, Clone, Error)]
pub enum CompactError {
    #[error("Compaction failed: {0}")]
    Failed(String),

    #[error("Compaction produced an empty conversation")]
    Emptied,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn rate_limit_classification() {
        assert!(ProviderError::RateLimited { retry_after_secs: 5 }.is_rate_limited());
        assert!(
            ProviderError::ApiError {
                status_code: 429,
                message: "slow down".into()
            }
            .is_rate_limited()
        );
        assert!(!ProviderError::Timeout("t".into()).is_rate_limited());
    }

    #[test]
    fn retryable_classification() {
        assert!(
            ProviderError::ApiError {
                status_code: 503,
                message: "unavailable".into()
            }
            .is_retryable()
        );
        assert!(ProviderError::Network("reset".into()).is_retryable());
        assert!(!ProviderError::AuthenticationFailed("bad key".into()).is_retryable());
        assert!(!ProviderError::ContentFilter("blocked".into()).is_retryable());
        assert!(
            !ProviderError::ApiError {
                status_code: 400,
                message: "bad request".into()
            }
            .is_retryable()
        );
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::ExecutionFailed {
            tool_name: "search".into(),
            reason: "backend unreachable".into(),
        });
        assert!(err.to_string().contains("search"));
        assert!(err.to_string().contains("backend unreachable"));
    }
}
