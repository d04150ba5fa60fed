//! Supervisor-side reactions to merge-queue outcomes.
//!
//! Worker notifications are best-effort; reclamation failures are escalated.

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    MergeFailedPayload, MergedPayload, MessageCategory, MessagePriority, OutboundMessage,
    OutcomePayload, ReworkRequestPayload, RigConfig, WorkerDonePayload,
};
use crate::domain::ports::{MessageRouter, ReclamationResult, WorkspaceReclaimer};
use crate::services::side_effects::{run_side_effect, SideEffectPolicy};

/// What the supervisor did for a WorkerDone message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerDoneAction {
    /// Direct-push group: the workspace was handed to the reclaimer.
    Reclaimed(ReclamationResult),
    /// Standard flow: the merge queue will report the outcome.
    AwaitingMergeQueue,
}

/// Handles outcome messages addressed to the supervisor role.
pub struct OutcomeHandler {
    router: Arc<dyn MessageRouter>,
    reclaimer: Arc<dyn WorkspaceReclaimer>,
    rig: RigConfig,
    /// Sender address of worker notifications
    sender: String,
    /// Remote named in rebase instructions
    remote: String,
}

impl OutcomeHandler {
    pub fn new(
        router: Arc<dyn MessageRouter>,
        reclaimer: Arc<dyn WorkspaceReclaimer>,
        rig: RigConfig,
    ) -> Self {
        let sender = rig.role_address("witness");
        Self {
            router,
            reclaimer,
            rig,
            sender,
            remote: "origin".to_string(),
        }
    }

    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn with_remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = remote.into();
        self
    }

    /// Route a decoded payload to its handler.
    pub async fn handle(&self, payload: &OutcomePayload) -> DomainResult<()> {
        match payload {
            OutcomePayload::Merged(p) => self.handle_merged(p).await.map(|_| ()),
            OutcomePayload::MergeFailed(p) => self.handle_merge_failed(p).await,
            OutcomePayload::ReworkRequest(p) => self.handle_rework_request(p).await,
            OutcomePayload::WorkerDone(p) => self.handle_worker_done(p).await.map(|_| ()),
        }
    }

    /// Notify the worker, then reclaim its workspace.
    ///
    /// A skipped reclamation is not an error.
    #[instrument(skip(self, payload), fields(worker = %payload.worker, branch = %payload.branch))]
    pub async fn handle_merged(&self, payload: &MergedPayload) -> DomainResult<ReclamationResult> {
        info!(
            issue = %payload.issue,
            target_branch = %payload.target_branch,
            commit = %payload.merge_commit,
            "MERGED received"
        );

        let body = format!(
            "Your work has been merged to {}.\n\n\
             Branch: {}\nIssue: {}\nCommit: {}\n\n\
             Your worktree will be cleaned up shortly.",
            payload.target_branch, payload.branch, payload.issue, payload.merge_commit
        );
        let notice = OutboundMessage::new(
            &self.sender,
            self.rig.worker_address(&payload.worker),
            "Work merged successfully",
            body,
        )
        .with_priority(MessagePriority::Normal);
        self.notify(notice).await?;

        self.reclaim(&payload.worker).await
    }

    /// Tell the worker what failed and to resubmit after fixing it.
    #[instrument(skip(self, payload), fields(worker = %payload.worker, branch = %payload.branch))]
    pub async fn handle_merge_failed(&self, payload: &MergeFailedPayload) -> DomainResult<()> {
        info!(kind = %payload.failure_kind, error = %payload.error, "MERGE_FAILED received");

        let body = format!(
            "Your merge request failed.\n\n\
             Branch: {}\nIssue: {}\nFailure: {}\nError: {}\n\n\
             Please fix the issue and resubmit your work.",
            payload.branch, payload.issue, payload.failure_kind, payload.error
        );
        let notice = OutboundMessage::new(
            &self.sender,
            self.rig.worker_address(&payload.worker),
            format!("Merge failed: {}", payload.failure_kind),
            body,
        )
        .with_priority(MessagePriority::High)
        .with_category(MessageCategory::Task);
        self.notify(notice).await?;

        info!("merge failed, rework needed");
        Ok(())
    }

    /// Ask the worker to rebase onto the target branch.
    #[instrument(skip(self, payload), fields(worker = %payload.worker, branch = %payload.branch))]
    pub async fn handle_rework_request(&self, payload: &ReworkRequestPayload) -> DomainResult<()> {
        info!(
            target_branch = %payload.target_branch,
            conflicts = ?payload.conflict_files,
            "REWORK_REQUEST received"
        );

        let notice = OutboundMessage::new(
            &self.sender,
            self.rig.worker_address(&payload.worker),
            "Rebase required - merge conflict",
            self.rebase_instructions(payload),
        )
        .with_priority(MessagePriority::High)
        .with_category(MessageCategory::Task);
        self.notify(notice).await?;

        info!(target_branch = %payload.target_branch, "worker must rebase");
        Ok(())
    }

    /// Reclaim immediately for direct-push groups; otherwise wait for the
    /// merge queue.
    #[instrument(skip(self, payload), fields(worker = %payload.worker))]
    pub async fn handle_worker_done(
        &self,
        payload: &WorkerDonePayload,
    ) -> DomainResult<WorkerDoneAction> {
        info!(exit = payload.exit.as_str(), branch = %payload.branch, "WORKER_DONE received");

        if payload.skip_integration_flow() {
            info!(
                convoy = payload.convoy_id.as_deref().unwrap_or_default(),
                "direct-push group, merge flow skipped"
            );
            let result = self.reclaim(&payload.worker).await?;
            return Ok(WorkerDoneAction::Reclaimed(result));
        }

        info!(
            mr = payload.merge_request.as_deref().unwrap_or_default(),
            "standard flow, merge queue will process the request"
        );
        Ok(WorkerDoneAction::AwaitingMergeQueue)
    }

    fn rebase_instructions(&self, payload: &ReworkRequestPayload) -> String {
        let mut conflicts = String::new();
        if !payload.conflict_files.is_empty() {
            conflicts.push_str("\nConflicting files:\n");
            for file in &payload.conflict_files {
                conflicts.push_str(&format!("  - {file}\n"));
            }
        }

        format!(
            "Your branch has conflicts with {target}.\n\n\
             Branch: {branch}\nIssue: {issue}\n{conflicts}\n\
             Please rebase your changes:\n\n  \
             git fetch {remote}\n  \
             git rebase {remote}/{target}\n  \
             # Resolve any conflicts\n  \
             git push -f\n\n\
             Then resubmit for merge.",
            target = payload.target_branch,
            branch = payload.branch,
            issue = payload.issue,
            remote = self.remote,
        )
    }

    async fn notify(&self, message: OutboundMessage) -> DomainResult<()> {
        run_side_effect(
            SideEffectPolicy::BestEffort,
            "worker notification",
            self.router.send(message),
        )
        .await
        .map(|_| ())
    }

    async fn reclaim(&self, worker: &str) -> DomainResult<ReclamationResult> {
        let attempt = async {
            match self.reclaimer.reclaim(worker).await {
                ReclamationResult::Failed { error } => Err(DomainError::Reclamation {
                    worker: worker.to_string(),
                    reason: error,
                }),
                other => Ok(other),
            }
        };
        let result = run_side_effect(SideEffectPolicy::MustEscalate, "reclamation", attempt)
            .await?
            .ok_or_else(|| DomainError::Reclamation {
                worker: worker.to_string(),
                reason: "no result".to_string(),
            })?;

        match &result {
            ReclamationResult::Reclaimed { reason } => info!(worker, reason = %reason, "workspace reclaimed"),
            ReclamationResult::Skipped { reason } => {
                warn!(worker, reason = %reason, "workspace reclamation skipped")
            }
            ReclamationResult::Failed { .. } => {}
        }
        Ok(result)
    }
}
