//! Domain errors for the healing engine.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::models::Stack;

/// Failure classes a healing run can hit.
///
/// Every variant maps to a stable tag (see [`HealError::tag`]) that is
/// written into the run timeline, so no error class disappears silently.
#[derive(Debug, Error)]
pub enum HealError {
    #[error("Clone failed for {repo}: {reason}")]
    CloneFailure { repo: String, reason: String },

    #[error("Checkout at {0} is empty")]
    EmptyCheckout(PathBuf),

    #[error("Zero test files discovered for a {stack} repository")]
    ZeroTestGuardTripped { stack: Stack },

    #[error("Sandbox timed out after {0}s")]
    SandboxTimeout(u64),

    #[error("Sandbox execution failed: {0}")]
    SandboxExecution(String),

    #[error("No diagnosable signal in test output")]
    NoDiagnosableSignal,

    #[error("Reasoning capability unavailable: {0}")]
    ReasoningUnavailable(String),

    #[error("Diagnosed target {target} is not corroborated by anchor ({anchor:?}) or logs")]
    HallucinatedTarget {
        target: String,
        anchor: Option<String>,
    },

    #[error("Patch rejected: {0}")]
    PatchRejected(String),

    #[error("Publish conflict: {0}")]
    PublishConflict(String),

    #[error("Publish failed: {0}")]
    PublishFailure(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HealError {
    /// Stable tag used for timeline events and persisted reports.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::CloneFailure { .. } => "CLONE_FAILURE",
            Self::EmptyCheckout(_) => "EMPTY_CHECKOUT",
            Self::ZeroTestGuardTripped { .. } => "ZERO_TEST_GUARD_TRIPPED",
            Self::SandboxTimeout(_) => "SANDBOX_TIMEOUT",
            Self::SandboxExecution(_) => "SANDBOX_EXECUTION_ERROR",
            Self::NoDiagnosableSignal => "NO_DIAGNOSABLE_SIGNAL",
            Self::ReasoningUnavailable(_) => "REASONING_UNAVAILABLE",
            Self::HallucinatedTarget { .. } => "HALLUCINATED_TARGET",
            Self::PatchRejected(_) => "PATCH_REJECTED",
            Self::PublishConflict(_) => "PUBLISH_CONFLICT",
            Self::PublishFailure(_) => "PUBLISH_FAILURE",
            Self::Io(_) => "IO_ERROR",
        }
    }

    /// Discovery-class failures end the run immediately; everything else
    /// is absorbed by the loop and costs at most one iteration.
    pub const fn is_retryable_within_run(&self) -> bool {
        !matches!(
            self,
            Self::CloneFailure { .. } | Self::EmptyCheckout(_) | Self::ZeroTestGuardTripped { .. }
        )
    }
}

pub type HealResult<T> = Result<T, HealError>;

/// Errors from the external reasoning capability.
#[derive(Debug, Clone, Error)]
pub enum ReasoningError {
    /// HTTP 429
    #[error("Rate limit exceeded")]
    RateLimited,

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    /// HTTP 5xx / 529
    #[error("Server error ({status}): {body}")]
    ServerError { status: u16, body: String },

    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    /// The capability answered, but not with parseable JSON of the expected shape.
    #[error("Malformed output: {0}")]
    Malformed(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),
}

impl ReasoningError {
    /// Returns true if this error is transient and should be retried
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError { .. } | Self::Timeout | Self::Network(_)
        )
    }

    /// Errors worth another attempt within the retry budget: transient
    /// failures plus quota exhaustion and unparseable replies. Rejected
    /// requests and bad credentials fail immediately.
    pub const fn is_retryable(&self) -> bool {
        self.is_transient() || matches!(self, Self::QuotaExceeded(_) | Self::Malformed(_))
    }
}

impl From<ReasoningError> for HealError {
    fn from(err: ReasoningError) -> Self {
        Self::ReasoningUnavailable(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discovery_errors_are_terminal() {
        assert!(!HealError::EmptyCheckout(PathBuf::from("/tmp/x")).is_retryable_within_run());
        assert!(!HealError::ZeroTestGuardTripped {
            stack: Stack::Python
        }
        .is_retryable_within_run());
        assert!(HealError::NoDiagnosableSignal.is_retryable_within_run());
        assert!(HealError::PublishFailure("push".into()).is_retryable_within_run());
    }

    #[test]
    fn test_transient_reasoning_errors() {
        assert!(ReasoningError::RateLimited.is_transient());
        assert!(ReasoningError::Timeout.is_transient());
        assert!(ReasoningError::ServerError {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!ReasoningError::Malformed("x".into()).is_transient());
        assert!(!ReasoningError::QuotaExceeded("daily".into()).is_transient());
    }

    #[test]
    fn test_quota_and_malformed_are_retryable_but_auth_is_not() {
        assert!(ReasoningError::Malformed("x".into()).is_retryable());
        assert!(ReasoningError::QuotaExceeded("daily".into()).is_retryable());
        assert!(ReasoningError::Timeout.is_retryable());
        assert!(!ReasoningError::Unauthorized("key".into()).is_retryable());
        assert!(!ReasoningError::InvalidRequest("body".into()).is_retryable());
    }

    #[test]
    fn test_reasoning_error_maps_to_unavailable() {
        let err: HealError = ReasoningError::Timeout.into();
        assert_eq!(err.tag(), "REASONING_UNAVAILABLE");
    }
}
