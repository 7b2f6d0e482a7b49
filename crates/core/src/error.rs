//! Error types for the relayclaw domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant. Backend and tool failures
//! are normally folded into events as data; the variants below that reach a
//! caller through the event stream are the fatal ones.

use thiserror::Error;

/// The top-level error type for all relayclaw operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Model backend errors ---
    #[error("Model error: {0}")]
    Model(#[from] ModelError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Flow invariants (fatal) ---
    #[error("Last event {event_id} of the turn is partial; the model output was truncated")]
    PartialFinalEvent { event_id: String },

    #[error("Agent '{name}' not found in the agent tree")]
    AgentNotFound { name: String },

    #[error("Agent name '{name}' appears more than once in the agent tree")]
    DuplicateAgent { name: String },

    #[error("LLM call limit of {limit} exceeded for this invocation")]
    LlmCallLimitExceeded { limit: u32 },

    /// The consumer dropped the event stream. Never reported to anyone.
    #[error("Invocation cancelled by the consumer")]
    Cancelled,

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by backend, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

impl ModelError {
    /// Stable code recorded in `ModelResponse::error_code`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::ApiError { .. } => "API_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::AuthenticationFailed(_) => "AUTHENTICATION_FAILED",
            Self::ModelNotFound(_) => "MODEL_NOT_FOUND",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::StreamInterrupted(_) => "STREAM_INTERRUPTED",
            Self::Timeout(_) => "TIMEOUT",
            Self::Network(_) => "NETWORK_ERROR",
        }
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

    #[error("Permission denied: {tool_name}: {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),
}

impl Error {
    /// Whether this error aborts a whole invocation rather than being
    /// reported back to the model.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::PartialFinalEvent { .. }
                | Self::AgentNotFound { .. }
                | Self::DuplicateAgent { .. }
                | Self::LlmCallLimitExceeded { .. }
                | Self::Cancelled
                | Self::Config { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_error_displays_correctly() {
        let err = Error::Model(ModelError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn model_error_codes_are_stable() {
        assert_eq!(
            ModelError::RateLimited { retry_after_secs: 3 }.code(),
            "RATE_LIMITED"
        );
        assert_eq!(ModelError::InvalidRequest("bad".into()).code(), "INVALID_REQUEST");
    }

    #[test]
    fn agent_not_found_is_fatal() {
        let err = Error::AgentNotFound {
            name: "billing".into(),
        };
        assert!(err.is_fatal());
        assert!(err.to_string().contains("billing"));
        assert!(!Error::Tool(ToolError::NotFound("x".into())).is_fatal());
    }
}
