//! Core error taxonomy.
//!
//! Every fallible operation in the orchestration core returns [`CoreError`].
//! Adapter implementations classify transport-level failures into these
//! variants at the boundary; the pipeline decides retry behavior from
//! [`CoreError::is_retryable`] and the HTTP facade maps variants to status
//! codes. Raw adapter errors never reach clients.

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    /// Malformed request. Rejected before job creation, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// An upstream dependency (AI model, index, network) is unreachable
    /// or timed out. Retryable.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Upstream rejected the call due to rate limiting. Retryable, with an
    /// optional server-provided backoff hint.
    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Delay suggested by the upstream (e.g. `Retry-After`), if any.
        retry_after_ms: Option<u64>,
    },

    /// Upstream rejected the request as invalid. Not retryable; fails the
    /// job immediately.
    #[error("upstream rejected request: {0}")]
    UpstreamRejected(String),

    /// Unknown job id, or a repository with no data behind it. Distinct
    /// from a computed-but-empty result.
    #[error("not found: {0}")]
    NotFound(String),

    /// Concurrency or queue limit reached. The trigger is rejected and the
    /// client is expected to retry later.
    #[error("backpressure: {0}")]
    Backpressure(String),

    /// The job state store is unreachable or refused a write. Retryable at
    /// the stage level; persistent storage failure surfaces as `ready=false`.
    #[error("storage failure: {0}")]
    Storage(String),
}

impl CoreError {
    /// Whether the pipeline may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamUnavailable(_)
                | CoreError::RateLimited { .. }
                | CoreError::Storage(_)
        )
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Validation(_) => ErrorKind::Validation,
            CoreError::UpstreamUnavailable(_) => ErrorKind::UpstreamUnavailable,
            CoreError::RateLimited { .. } => ErrorKind::RateLimited,
            CoreError::UpstreamRejected(_) => ErrorKind::UpstreamRejected,
            CoreError::NotFound(_) => ErrorKind::NotFound,
            CoreError::Backpressure(_) => ErrorKind::Backpressure,
            CoreError::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => CoreError::NotFound("row not found".to_string()),
            other => CoreError::Storage(other.to_string()),
        }
    }
}

/// Serializable tag for a [`CoreError`] variant, recorded on failed jobs so
/// `GET status` can report the terminal error kind without a stack trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    UpstreamUnavailable,
    RateLimited,
    UpstreamRejected,
    NotFound,
    Backpressure,
    Storage,
}
