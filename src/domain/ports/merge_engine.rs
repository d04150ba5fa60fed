use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::models::{FailureKind, MergeRequest};

/// Why an integration attempt did not land
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFailure {
    pub kind: FailureKind,
    pub error: String,
    /// Populated for conflicts
    pub conflict_files: Vec<String>,
    /// The worker can fix the branch and the same request retried
    pub recoverable: bool,
}

impl MergeFailure {
    /// Failure whose recoverability follows its kind.
    pub fn new(kind: FailureKind, error: impl Into<String>) -> Self {
        Self {
            kind,
            error: error.into(),
            conflict_files: Vec::new(),
            recoverable: kind.is_recoverable(),
        }
    }

    pub fn conflict(files: Vec<String>) -> Self {
        let error = if files.is_empty() {
            "merge conflict".to_string()
        } else {
            format!("merge conflict in {}", files.join(", "))
        };
        Self {
            kind: FailureKind::Conflict,
            error,
            conflict_files: files,
            recoverable: true,
        }
    }

    pub fn with_recoverable(mut self, recoverable: bool) -> Self {
        self.recoverable = recoverable;
        self
    }
}

/// Result of one integration attempt
///
/// A failed attempt is an expected outcome, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MergeOutcome {
    Merged { merge_commit: String },
    Failed(MergeFailure),
}

impl MergeOutcome {
    pub fn is_merged(&self) -> bool {
        matches!(self, Self::Merged { .. })
    }
}

/// Port for the branch integration mechanics
#[async_trait]
pub trait MergeEngine: Send + Sync {
    /// Integrate the request's branch into its target branch
    async fn merge(&self, request: &MergeRequest) -> MergeOutcome;
}
