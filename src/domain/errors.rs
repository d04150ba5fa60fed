//! Domain errors for the merge-queue pipeline.

use thiserror::Error;

use super::models::CloseReason;

/// Domain-level errors that can occur in the merge-queue pipeline.
///
/// Merge engine failures are deliberately absent: a failed integration attempt
/// is an expected [`MergeOutcome`](crate::domain::ports::MergeOutcome), not an error.
#[derive(Debug, Error)]
pub enum DomainError {
    /// No merge request matched a lookup.
    #[error("Merge request not found: {0}")]
    NotFound(String),

    /// Attempted to mutate a request that is already closed.
    #[error("Merge request {id} is already closed with reason: {reason}")]
    ClosedImmutable { id: String, reason: CloseReason },

    /// The request store could not be queried or updated.
    #[error("Request store unavailable: {0}")]
    StoreUnavailable(String),

    /// A notification could not be delivered.
    #[error("Notification to {recipient} failed: {reason}")]
    Notification { recipient: String, reason: String },

    /// A worker's workspace could not be reclaimed.
    #[error("Reclamation failed for worker {worker}: {reason}")]
    Reclamation { worker: String, reason: String },

    /// A protocol message could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Another daemon instance holds the liveness marker.
    #[error("Daemon already running (PID {0})")]
    AlreadyRunning(u32),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type DomainResult<T> = Result<T, DomainError>;

impl DomainError {
    /// Whether this error reports an attempt to mutate a closed request.
    pub fn is_closed_immutable(&self) -> bool {
        matches!(self, Self::ClosedImmutable { .. })
    }
}

impl From<sqlx::Error> for DomainError {
    fn from(err: sqlx::Error) -> Self {
        DomainError::StoreUnavailable(err.to_string())
    }
}

impl From<serde_json::Error> for DomainError {
    fn from(err: serde_json::Error) -> Self {
        DomainError::SerializationError(err.to_string())
    }
}
