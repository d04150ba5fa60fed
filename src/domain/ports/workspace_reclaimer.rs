use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of a reclamation attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReclamationResult {
    /// The workspace was removed
    Reclaimed { reason: String },
    /// The workspace was left in place, e.g. because it holds unpushed work
    Skipped { reason: String },
    Failed { error: String },
}

impl ReclamationResult {
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// Port for reclaiming a finished worker's checkout
#[async_trait]
pub trait WorkspaceReclaimer: Send + Sync {
    async fn reclaim(&self, worker: &str) -> ReclamationResult;
}
