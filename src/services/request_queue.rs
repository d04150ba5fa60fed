//! Request queue service.
//!
//! Reads open merge requests from the request store, ranks them with the
//! priority scorer, and performs the store-confirmed state transitions
//! (reject, supersede, dispositions after a merge attempt).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{
    format_age, CloseReason, Disposition, MergeRequest, MergeRequestStatus, MessagePriority,
    OutboundMessage, QueueItem, RigConfig, ScoreInput,
};
use crate::domain::ports::{MessageRouter, RequestRecord, RequestStore};
use crate::services::priority_scorer::PriorityScorer;
use crate::services::side_effects::{run_side_effect, SideEffectPolicy};

/// Priority-ordered view over the request store
pub struct RequestQueue {
    store: Arc<dyn RequestStore>,
    router: Arc<dyn MessageRouter>,
    scorer: PriorityScorer,
    rig: RigConfig,
    /// Sender address of worker notices
    sender: String,
}

impl RequestQueue {
    pub fn new(
        store: Arc<dyn RequestStore>,
        router: Arc<dyn MessageRouter>,
        scorer: PriorityScorer,
        rig: RigConfig,
    ) -> Self {
        let sender = rig.role_address("refinery");
        Self {
            store,
            router,
            scorer,
            rig,
            sender,
        }
    }

    /// Override the address rejection notices are sent from.
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    pub fn rig(&self) -> &RigConfig {
        &self.rig
    }

    /// Open requests ranked by descending score.
    pub async fn queue(&self) -> DomainResult<Vec<QueueItem>> {
        self.queue_at(Utc::now()).await
    }

    /// Open requests ranked by descending score as of `now`.
    ///
    /// Equal scores are ordered oldest first, then by id.
    #[instrument(skip(self))]
    pub async fn queue_at(&self, now: DateTime<Utc>) -> DomainResult<Vec<QueueItem>> {
        let records = self.store.list_open_requests().await?;

        let mut scored: Vec<(f64, MergeRequest)> = records
            .iter()
            .filter(|record| record.status == MergeRequestStatus::Open)
            .map(|record| {
                let mr = record.to_merge_request(&self.rig.default_branch, now);
                (self.scorer.score(&score_input(record, &mr, now)), mr)
            })
            .collect();

        scored.sort_by(|(score_a, a), (score_b, b)| {
            score_b
                .total_cmp(score_a)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        });

        let items: Vec<QueueItem> = scored
            .into_iter()
            .enumerate()
            .map(|(idx, (score, mr))| QueueItem {
                position: idx + 1,
                age: format_age(mr.created_at, now),
                mr,
                score,
            })
            .collect();

        debug!(open = items.len(), "queue ranked");
        Ok(items)
    }

    /// Find a request by id or branch.
    ///
    /// Rules are tried in order across the whole queue: exact id, exact
    /// branch, worker name expanded to its branch, then id substring. When
    /// nothing open matches, closed requests are consulted by exact id,
    /// branch or worker branch so callers can report them as closed.
    pub async fn find_mr(&self, id_or_branch: &str) -> DomainResult<MergeRequest> {
        let query = id_or_branch.trim();
        if query.is_empty() {
            return Err(DomainError::NotFound(id_or_branch.to_string()));
        }

        let queue = self.queue().await?;
        let worker_branch = self.rig.worker_branch(query);

        let rules: [&dyn Fn(&MergeRequest) -> bool; 4] = [
            &|mr: &MergeRequest| mr.id == query,
            &|mr: &MergeRequest| mr.branch == query,
            &|mr: &MergeRequest| mr.branch == worker_branch,
            &|mr: &MergeRequest| mr.id.contains(query),
        ];
        for rule in rules {
            if let Some(item) = queue.iter().find(|item| rule(&item.mr)) {
                return Ok(item.mr.clone());
            }
        }

        for key in [query, worker_branch.as_str()] {
            if let Some(record) = self.store.get_request(key).await? {
                return Ok(record.to_merge_request(&self.rig.default_branch, Utc::now()));
            }
        }
        Err(DomainError::NotFound(query.to_string()))
    }

    /// Reject a request, closing it in the store.
    ///
    /// When `notify` is set the worker receives a best-effort notice.
    #[instrument(skip(self))]
    pub async fn reject_mr(
        &self,
        id_or_branch: &str,
        reason: &str,
        notify: bool,
    ) -> DomainResult<MergeRequest> {
        let mut mr = self.find_mr(id_or_branch).await?;
        ensure_not_closed(&mr)?;

        self.store
            .close(&mr.id, &CloseReason::Rejected.store_text(Some(reason)))
            .await?;
        mr.close(CloseReason::Rejected)?;
        mr.error = Some(reason.to_string());
        info!(mr_id = %mr.id, branch = %mr.branch, reason, "merge request rejected");

        if notify {
            let notice = self.rejection_notice(&mr, reason);
            run_side_effect(
                SideEffectPolicy::BestEffort,
                "rejection notice",
                self.router.send(notice),
            )
            .await?;
        }

        Ok(mr)
    }

    /// Close a request as superseded by another request or branch.
    #[instrument(skip(self))]
    pub async fn supersede_mr(&self, id_or_branch: &str, by: &str) -> DomainResult<MergeRequest> {
        let mut mr = self.find_mr(id_or_branch).await?;
        ensure_not_closed(&mr)?;

        let detail = format!("by {by}");
        self.store
            .close(&mr.id, &CloseReason::Superseded.store_text(Some(&detail)))
            .await?;
        mr.close(CloseReason::Superseded)?;
        info!(mr_id = %mr.id, by, "merge request superseded");
        Ok(mr)
    }

    /// Mirror the hand-off to the merge engine.
    pub fn mark_in_progress(&self, mr: &mut MergeRequest) -> DomainResult<()> {
        mr.start_processing()
    }

    /// Apply a disposition in the store, then mirror it locally.
    ///
    /// Non-merged closes record the request's last error as detail.
    #[instrument(skip(self, mr), fields(mr_id = %mr.id))]
    pub async fn apply_disposition(
        &self,
        mr: &mut MergeRequest,
        disposition: Disposition,
    ) -> DomainResult<()> {
        ensure_not_closed(mr)?;

        match disposition {
            Disposition::Reopen => {
                self.store.reopen(&mr.id).await?;
            }
            Disposition::Close(reason) => {
                let detail = match reason {
                    CloseReason::Merged => None,
                    CloseReason::Rejected | CloseReason::Superseded => mr.error.as_deref(),
                };
                self.store.close(&mr.id, &reason.store_text(detail)).await?;
            }
        }
        mr.apply(disposition)
    }

    fn rejection_notice(&self, mr: &MergeRequest, reason: &str) -> OutboundMessage {
        let body = format!(
            "Your merge request has been rejected.\n\n\
             Branch: {}\nIssue: {}\nReason: {reason}\n\n\
             Please review the feedback and address the issues before resubmitting.",
            mr.branch, mr.source_issue
        );
        OutboundMessage::new(
            &self.sender,
            self.rig.worker_address(&mr.worker),
            "Merge request rejected",
            body,
        )
        .with_priority(MessagePriority::Normal)
    }
}

fn ensure_not_closed(mr: &MergeRequest) -> DomainResult<()> {
    if mr.is_closed() {
        return Err(DomainError::ClosedImmutable {
            id: mr.id.clone(),
            reason: mr.close_reason.unwrap_or(CloseReason::Merged),
        });
    }
    Ok(())
}

fn score_input(record: &RequestRecord, mr: &MergeRequest, now: DateTime<Utc>) -> ScoreInput {
    let input = ScoreInput::new(record.priority, mr.created_at, now).with_retries(record.retry_count());
    match record.convoy_created_at() {
        Some(convoy) => input.with_convoy(convoy),
        None => input,
    }
}
