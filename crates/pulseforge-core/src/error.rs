//! Pipeline error taxonomy.
//!
//! [`PipelineError`] carries what went wrong; [`ErrorKind`] is the policy
//! classification the orchestrator acts on. Kinds are grouped into
//! retryable ([`ErrorKind::Transient`]), degrade-in-place
//! ([`ErrorKind::Degraded`], [`ErrorKind::PremiumUnavailable`],
//! [`ErrorKind::Parse`]), terminal-per-event ([`ErrorKind::Conflict`],
//! [`ErrorKind::Poison`]), and crash-the-worker ([`ErrorKind::Fatal`]).

use thiserror::Error;

use pulseforge_llm::ModelError;
use pulseforge_types::pulse::PulseValidationError;

/// Policy classification of a pipeline failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Upstream timeout, throttling, 5xx, store contention. Retry with
    /// backoff, bounded by the event deadline.
    Transient,
    /// Config or ledger unreachable after retries. Proceed as if AI is
    /// disabled; never drop the pulse.
    Degraded,
    /// Every model candidate exhausted or entitlement denied. Fall through
    /// to the rule enhancer; do not charge budget.
    PremiumUnavailable,
    /// Model output unusable even after the repair pass. Treated like
    /// premium-unavailable for the pulse.
    Parse,
    /// A differing record already exists for this pulse. The existing
    /// record wins; ack without retry.
    Conflict,
    /// Malformed source event. Dead-letter immediately.
    Poison,
    /// Programmer error. Crash the worker; the event returns to source.
    Fatal,
}

impl ErrorKind {
    /// The tag written into dead-letter envelopes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Degraded => "degraded",
            Self::PremiumUnavailable => "premium_unavailable",
            Self::Parse => "parse",
            Self::Conflict => "conflict",
            Self::Poison => "poison",
            Self::Fatal => "fatal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors surfaced by pipeline components.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PipelineError {
    /// A retryable failure in the named operation.
    #[error("transient failure in {operation}: {message}")]
    Transient {
        /// Which step failed (e.g. "ledger_read", "persist").
        operation: &'static str,
        message: String,
    },

    /// Config or ledger could not be reached after bounded retries.
    #[error("degraded: {0}")]
    Degraded(String),

    /// Premium enhancement is unavailable for this pulse.
    #[error("premium unavailable: {0}")]
    PremiumUnavailable(String),

    /// Model output could not be coerced into insights.
    #[error("unparseable model output: {0}")]
    Parse(String),

    /// A differing record already exists for this pulse id.
    #[error("conflicting record for pulse {pulse_id}")]
    Conflict { pulse_id: String },

    /// The source event is malformed.
    #[error("poison event: {0}")]
    Poison(#[from] PulseValidationError),

    /// The event's end-to-end wall-clock budget elapsed.
    #[error("event deadline exceeded in {operation}")]
    DeadlineExceeded {
        /// The step that was in flight when the deadline passed.
        operation: &'static str,
    },

    /// Programmer error; the worker must not continue.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl PipelineError {
    /// The policy classification for this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transient { .. } => ErrorKind::Transient,
            Self::Degraded(_) => ErrorKind::Degraded,
            Self::PremiumUnavailable(_) => ErrorKind::PremiumUnavailable,
            Self::Parse(_) => ErrorKind::Parse,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Poison(_) => ErrorKind::Poison,
            // Deadline exhaustion dead-letters through the transient path.
            Self::DeadlineExceeded { .. } => ErrorKind::Transient,
            Self::Fatal(_) => ErrorKind::Fatal,
        }
    }
}

impl From<ModelError> for PipelineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::AllModelsExhausted { .. }
            | ModelError::NotEntitled(_)
            | ModelError::ModelNotFound(_)
            | ModelError::NotConfigured(_) => Self::PremiumUnavailable(err.to_string()),
            ModelError::InvalidResponse(_) | ModelError::Json(_) => Self::Parse(err.to_string()),
            other if other.is_transient() => Self::Transient {
                operation: "model_call",
                message: other.to_string(),
            },
            other => Self::PremiumUnavailable(other.to_string()),
        }
    }
}

/// A convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PipelineError>;
