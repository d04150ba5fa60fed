//! Merge-queue processing daemon.
//!
//! Owned by the coordinator role. Each cycle drains the coordinator inbox,
//! then feeds open merge requests through the merge engine in priority
//! order and emits an outcome message per attempt:
//! - Wakes on an in-process or SIGUSR1 wakeup, or on a safety-net timer
//! - Resets the timer to a full interval after every cycle
//! - Runs one cycle on startup for requests that arrived while down

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{Notify, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use crate::domain::models::{
    classify, CloseReason, Config, Disposition, FailureKind, InboundMessage, MergeFailedPayload,
    MergeRequest, MergedPayload, OutboundMessage, OutcomePayload, ProtocolKind,
    ReworkRequestPayload,
};
use crate::domain::ports::{Mailbox, MergeEngine, MergeOutcome, MessageRouter};
use crate::services::request_queue::RequestQueue;
use crate::services::side_effects::{run_side_effect, SideEffectPolicy};
use crate::services::wakeup::{
    wait_for_termination, TerminationSignals, WakeupCapability, WakeupNotifier, WakeupSource,
};

/// Configuration for the processing daemon.
#[derive(Debug, Clone)]
pub struct ProcessingDaemonConfig {
    /// Safety-net timer interval.
    pub poll_interval: Duration,
    /// Role name used in forwarded subjects.
    pub role: String,
    /// Address outcome and forwarded messages are sent from.
    pub coordinator_address: String,
    /// Address outcome messages are sent to.
    pub supervisor_address: String,
    /// Address unrecognized inbound messages are forwarded to.
    pub overseer_address: String,
    /// Listen for SIGINT/SIGTERM and SIGUSR1.
    pub handle_os_signals: bool,
}

impl Default for ProcessingDaemonConfig {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl ProcessingDaemonConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.daemon.poll_interval_secs),
            role: config.daemon.coordinator_role.clone(),
            coordinator_address: config.rig.role_address(&config.daemon.coordinator_role),
            supervisor_address: config.rig.role_address(&config.daemon.supervisor_role),
            overseer_address: config.daemon.overseer_address.clone(),
            handle_os_signals: config.daemon.handle_os_signals,
        }
    }

    /// Create config with custom interval and no OS signal handling.
    pub fn with_interval(interval: Duration) -> Self {
        Self {
            poll_interval: interval,
            handle_os_signals: false,
            ..Default::default()
        }
    }
}

/// What started a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleTrigger {
    Startup,
    Wakeup,
    Timer,
}

/// Summary of one processing cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub trigger: CycleTrigger,
    /// Inbound messages classified and marked read.
    pub drained: usize,
    pub merge_ready: usize,
    pub forwarded: usize,
    /// Requests handed to the merge engine.
    pub attempted: usize,
    pub merged: usize,
    pub failed: usize,
    /// Cancellation was observed before the queue was exhausted.
    pub interrupted: bool,
}

impl CycleReport {
    fn new(trigger: CycleTrigger) -> Self {
        Self {
            trigger,
            drained: 0,
            merge_ready: 0,
            forwarded: 0,
            attempted: 0,
            merged: 0,
            failed: 0,
            interrupted: false,
        }
    }
}

/// Status of the processing daemon.
#[derive(Debug, Clone, Default)]
pub struct DaemonStatus {
    pub running: bool,
    /// Wakeup source selected at startup.
    pub wakeup: Option<WakeupCapability>,
    pub cycles: u64,
    /// Times the safety-net timer was re-armed after a cycle.
    pub timer_resets: u64,
    pub drained: u64,
    pub forwarded: u64,
    pub merged: u64,
    pub failed: u64,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

/// Handle to control a running daemon.
#[derive(Clone)]
pub struct DaemonHandle {
    stop_flag: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    notifier: WakeupNotifier,
    status: Arc<RwLock<DaemonStatus>>,
}

impl DaemonHandle {
    /// Request the daemon to stop. An in-flight merge finishes first.
    pub fn shutdown(&self) {
        self.stop_flag.store(true, Ordering::Release);
        self.shutdown.notify_one();
    }

    /// Request an immediate cycle.
    pub fn wake(&self) {
        self.notifier.wake();
    }

    /// Get current daemon status.
    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }
}

/// Event-driven merge-queue processor.
pub struct ProcessingDaemon {
    queue: Arc<RequestQueue>,
    engine: Arc<dyn MergeEngine>,
    mailbox: Arc<dyn Mailbox>,
    router: Arc<dyn MessageRouter>,
    config: ProcessingDaemonConfig,
    notifier: WakeupNotifier,
    stop_flag: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
    status: Arc<RwLock<DaemonStatus>>,
}

impl ProcessingDaemon {
    pub fn new(
        queue: Arc<RequestQueue>,
        engine: Arc<dyn MergeEngine>,
        mailbox: Arc<dyn Mailbox>,
        router: Arc<dyn MessageRouter>,
        config: ProcessingDaemonConfig,
    ) -> Self {
        Self {
            queue,
            engine,
            mailbox,
            router,
            config,
            notifier: WakeupNotifier::new(),
            stop_flag: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
            status: Arc::new(RwLock::new(DaemonStatus::default())),
        }
    }

    /// Get a handle to control the daemon.
    pub fn handle(&self) -> DaemonHandle {
        DaemonHandle {
            stop_flag: self.stop_flag.clone(),
            shutdown: self.shutdown.clone(),
            notifier: self.notifier.clone(),
            status: self.status.clone(),
        }
    }

    pub fn config(&self) -> &ProcessingDaemonConfig {
        &self.config
    }

    /// Get current status.
    pub async fn status(&self) -> DaemonStatus {
        self.status.read().await.clone()
    }

    fn stop_requested(&self) -> bool {
        self.stop_flag.load(Ordering::Acquire)
    }

    /// Run until shutdown is requested or a termination signal arrives.
    pub async fn run(&self) {
        let (wakeup, mut termination) = if self.config.handle_os_signals {
            let termination = match TerminationSignals::install() {
                Ok(signals) => Some(signals),
                Err(e) => {
                    warn!(error = %e, "cannot install termination signal handlers");
                    None
                }
            };
            (WakeupSource::probe(&self.notifier), termination)
        } else {
            (WakeupCapability::PollOnly, None)
        };

        {
            let mut status = self.status.write().await;
            status.running = true;
            status.wakeup = Some(wakeup);
        }
        info!(
            role = %self.config.role,
            poll_interval_secs = self.config.poll_interval.as_secs(),
            wakeup = wakeup.as_str(),
            "processing daemon started"
        );

        if !self.stop_requested() {
            self.process_cycle(CycleTrigger::Startup).await;
        }

        let timer = tokio::time::sleep(self.config.poll_interval);
        tokio::pin!(timer);

        loop {
            if self.stop_requested() {
                break;
            }

            let trigger = tokio::select! {
                biased;
                _ = self.shutdown.notified() => break,
                signal = wait_for_termination(&mut termination) => {
                    info!(signal, "termination signal received");
                    self.stop_flag.store(true, Ordering::Release);
                    break;
                }
                _ = self.notifier.notified() => CycleTrigger::Wakeup,
                _ = &mut timer => CycleTrigger::Timer,
            };

            self.process_cycle(trigger).await;

            timer.as_mut().reset(Instant::now() + self.config.poll_interval);
            self.status.write().await.timer_resets += 1;
        }

        self.status.write().await.running = false;
        info!(role = %self.config.role, "processing daemon stopped");
    }

    /// Run one drain-then-dispatch cycle.
    #[instrument(skip(self))]
    pub async fn process_cycle(&self, trigger: CycleTrigger) -> CycleReport {
        let mut report = CycleReport::new(trigger);

        self.drain_inbox(&mut report).await;
        self.process_ready_requests(&mut report).await;

        {
            let mut status = self.status.write().await;
            status.cycles += 1;
            status.drained += report.drained as u64;
            status.forwarded += report.forwarded as u64;
            status.merged += report.merged as u64;
            status.failed += report.failed as u64;
            status.last_cycle_at = Some(Utc::now());
        }
        debug!(?report, "cycle complete");
        report
    }

    async fn drain_inbox(&self, report: &mut CycleReport) {
        let messages = match self.mailbox.list_unread().await {
            Ok(messages) => messages,
            Err(e) => {
                warn!(error = %e, "cannot list inbox, skipping drain");
                return;
            }
        };

        for msg in messages {
            match classify(&msg.subject) {
                ProtocolKind::MergeReady => {
                    info!(from = %msg.from, subject = %msg.subject, "merge-ready notification");
                    report.merge_ready += 1;
                }
                _ => {
                    let forward = self.forward_message(&msg);
                    let sent =
                        run_side_effect(SideEffectPolicy::BestEffort, "forward", self.router.send(forward))
                            .await;
                    if matches!(sent, Ok(Some(()))) {
                        report.forwarded += 1;
                    }
                }
            }

            let _ = run_side_effect(
                SideEffectPolicy::BestEffort,
                "mark read",
                self.mailbox.mark_read(&msg.id),
            )
            .await;
            report.drained += 1;
        }
    }

    fn forward_message(&self, msg: &InboundMessage) -> OutboundMessage {
        OutboundMessage::new(
            &self.config.coordinator_address,
            &self.config.overseer_address,
            format!("[FWD from {}] {}", self.config.role, msg.subject),
            format!(
                "Forwarded from {} (unrecognized message type):\n\nFrom: {}\nSubject: {}\n\n{}",
                self.config.coordinator_address, msg.from, msg.subject, msg.body
            ),
        )
    }

    async fn process_ready_requests(&self, report: &mut CycleReport) {
        let queue = match self.queue.queue().await {
            Ok(queue) => queue,
            Err(e) => {
                warn!(error = %e, "cannot list merge queue, ending cycle");
                return;
            }
        };
        if queue.is_empty() {
            return;
        }
        info!(count = queue.len(), "processing ready merge requests");

        for item in queue {
            if self.stop_requested() {
                report.interrupted = true;
                break;
            }
            self.process_request(item.mr, report).await;
        }
    }

    #[instrument(skip(self, mr, report), fields(mr_id = %mr.id, branch = %mr.branch))]
    async fn process_request(&self, mut mr: MergeRequest, report: &mut CycleReport) {
        if let Err(e) = self.queue.mark_in_progress(&mut mr) {
            warn!(error = %e, "skipping merge request");
            return;
        }
        report.attempted += 1;

        let outcome = self.engine.merge(&mr).await;
        let (disposition, payload) = match outcome {
            MergeOutcome::Merged { merge_commit } => {
                info!(commit = short_sha(&merge_commit), "merged");
                report.merged += 1;
                let payload = OutcomePayload::Merged(MergedPayload {
                    worker: mr.worker.clone(),
                    branch: mr.branch.clone(),
                    issue: mr.source_issue.clone(),
                    target_branch: mr.target_branch.clone(),
                    merge_commit,
                });
                (Disposition::Close(CloseReason::Merged), payload)
            }
            MergeOutcome::Failed(failure) => {
                warn!(
                    kind = %failure.kind,
                    recoverable = failure.recoverable,
                    error = %failure.error,
                    "merge failed"
                );
                report.failed += 1;
                mr.error = Some(failure.error.clone());

                let disposition = if failure.recoverable {
                    Disposition::Reopen
                } else {
                    Disposition::Close(CloseReason::Rejected)
                };
                let payload = if failure.kind == FailureKind::Conflict {
                    OutcomePayload::ReworkRequest(ReworkRequestPayload {
                        worker: mr.worker.clone(),
                        branch: mr.branch.clone(),
                        issue: mr.source_issue.clone(),
                        target_branch: mr.target_branch.clone(),
                        conflict_files: failure.conflict_files,
                    })
                } else {
                    OutcomePayload::MergeFailed(MergeFailedPayload {
                        worker: mr.worker.clone(),
                        branch: mr.branch.clone(),
                        issue: mr.source_issue.clone(),
                        failure_kind: failure.kind,
                        error: failure.error,
                    })
                };
                (disposition, payload)
            }
        };

        if let Err(e) = self.queue.apply_disposition(&mut mr, disposition).await {
            error!(error = %e, ?disposition, "failed to record merge request disposition");
        }

        let message =
            payload.to_message(&self.config.coordinator_address, &self.config.supervisor_address);
        let _ = run_side_effect(
            SideEffectPolicy::BestEffort,
            "outcome notification",
            self.router.send(message),
        )
        .await;
    }
}

fn short_sha(sha: &str) -> &str {
    sha.get(..8).unwrap_or(sha)
}
