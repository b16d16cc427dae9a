//! Model invocation error types.
//!
//! All model operations return [`Result<T>`] with [`ModelError`] as the
//! error type. [`ModelError::is_transient`] drives the retry policy;
//! [`ModelError::is_failover_eligible`] drives candidate advancement in
//! the chooser.

use thiserror::Error;

/// Errors that can occur when invoking a model.
#[derive(Error, Debug)]
pub enum ModelError {
    /// The HTTP request to the model endpoint failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// The account is not entitled to the requested model (HTTP 401/403 or
    /// an explicit entitlement rejection).
    #[error("not entitled: {0}")]
    NotEntitled(String),

    /// The endpoint is throttling requests (HTTP 429).
    #[error("rate limited: retry after {retry_after_ms}ms")]
    RateLimited {
        /// Suggested wait before retrying, in milliseconds.
        retry_after_ms: u64,
    },

    /// The requested model does not exist on the endpoint.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// The client has not been configured (e.g. missing API key).
    #[error("not configured: {0}")]
    NotConfigured(String),

    /// The endpoint returned a response that could not be parsed.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The per-call wall-clock timeout elapsed.
    #[error("timeout")]
    Timeout,

    /// An HTTP-level error from reqwest.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// A JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every candidate model was tried and failed.
    #[error("all model candidates exhausted ({})", attempts.join("; "))]
    AllModelsExhausted {
        /// One "model: error" summary per failed candidate.
        attempts: Vec<String>,
    },
}

impl ModelError {
    /// Whether a retry of the same model may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::RateLimited { .. } | Self::Timeout | Self::Http(_) => true,
            Self::RequestFailed(msg) => {
                msg.starts_with("HTTP 500")
                    || msg.starts_with("HTTP 502")
                    || msg.starts_with("HTTP 503")
                    || msg.starts_with("HTTP 504")
            }
            _ => false,
        }
    }

    /// Whether the chooser should advance to the next candidate model.
    ///
    /// Entitlement and missing-model errors are per-model conditions;
    /// another candidate may work. Transient errors become failover
    /// eligible only after the retry layer has exhausted its attempts,
    /// which is when the chooser observes them.
    pub fn is_failover_eligible(&self) -> bool {
        matches!(
            self,
            Self::NotEntitled(_) | Self::ModelNotFound(_) | Self::NotConfigured(_)
        ) || self.is_transient()
    }
}

/// A convenience alias for model operations.
pub type Result<T> = std::result::Result<T, ModelError>;
