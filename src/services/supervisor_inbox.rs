//! Supervisor inbox draining.
//!
//! Decodes outcome messages from the supervisor mailbox and routes them to
//! the [`OutcomeHandler`]. Messages that are not outcomes stay unread for
//! whoever else reads the mailbox.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::domain::errors::{DomainError, DomainResult};
use crate::domain::models::{classify, OutcomePayload, ProtocolKind};
use crate::domain::ports::Mailbox;
use crate::services::outcome_handler::OutcomeHandler;
use crate::services::side_effects::{run_side_effect, SideEffectPolicy};

/// Result of one inbox drain.
#[derive(Debug, Default)]
pub struct InboxReport {
    /// Outcome messages handled successfully.
    pub handled: usize,
    /// Outcome messages whose handler escalated an error.
    pub failures: Vec<(String, DomainError)>,
    /// Messages left unread.
    pub ignored: usize,
}

pub struct SupervisorInbox {
    mailbox: Arc<dyn Mailbox>,
    handler: Arc<OutcomeHandler>,
}

impl SupervisorInbox {
    pub fn new(mailbox: Arc<dyn Mailbox>, handler: Arc<OutcomeHandler>) -> Self {
        Self { mailbox, handler }
    }

    /// Drain unread outcome messages once.
    ///
    /// A handled message is marked read even when its handler escalates.
    pub async fn drain(&self) -> DomainResult<InboxReport> {
        let messages = self.mailbox.list_unread().await?;
        let mut report = InboxReport::default();

        for msg in messages {
            match classify(&msg.subject) {
                ProtocolKind::Unknown | ProtocolKind::MergeReady => {
                    debug!(id = %msg.id, subject = %msg.subject, "not an outcome message, leaving unread");
                    report.ignored += 1;
                    continue;
                }
                _ => {}
            }

            let payload = match OutcomePayload::from_message(&msg) {
                Ok(payload) => payload,
                Err(e) => {
                    warn!(id = %msg.id, subject = %msg.subject, error = %e, "undecodable outcome message");
                    report.ignored += 1;
                    continue;
                }
            };

            match self.handler.handle(&payload).await {
                Ok(()) => report.handled += 1,
                Err(e) => {
                    error!(id = %msg.id, kind = %payload.kind(), error = %e, "outcome handler failed");
                    report.failures.push((msg.id.clone(), e));
                }
            }

            let _ = run_side_effect(
                SideEffectPolicy::BestEffort,
                "mark read",
                self.mailbox.mark_read(&msg.id),
            )
            .await;
        }

        if report.handled > 0 || !report.failures.is_empty() {
            info!(
                handled = report.handled,
                failed = report.failures.len(),
                ignored = report.ignored,
                "supervisor inbox drained"
            );
        }
        Ok(report)
    }
}
