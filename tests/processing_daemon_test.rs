//! Integration tests for the processing daemon with in-memory collaborators.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;

use common::{
    queue_over, record, wait_for, CallLog, MemoryMailbox, MemoryStore, RecordingRouter,
    ScriptedEngine,
};
use refinery::domain::models::{
    CloseReason, FailureKind, MergeRequestStatus, MessagePriority, OutcomePayload, ProtocolKind,
};
use refinery::domain::ports::MergeFailure;
use refinery::services::{CycleTrigger, ProcessingDaemon, ProcessingDaemonConfig};

const SUPERVISOR: &str = "rig/witness";
const OVERSEER: &str = "mayor/";

struct Harness {
    log: CallLog,
    store: Arc<MemoryStore>,
    mailbox: Arc<MemoryMailbox>,
    router: Arc<RecordingRouter>,
    engine: Arc<ScriptedEngine>,
}

impl Harness {
    fn new() -> Self {
        let log = CallLog::default();
        Self {
            store: Arc::new(MemoryStore::new(log.clone())),
            mailbox: Arc::new(MemoryMailbox::default()),
            router: Arc::new(RecordingRouter::new(log.clone())),
            engine: Arc::new(ScriptedEngine::new(log.clone())),
            log,
        }
    }

    fn daemon(&self, interval: StdDuration) -> ProcessingDaemon {
        ProcessingDaemon::new(
            Arc::new(queue_over(self.store.clone(), self.router.clone())),
            self.engine.clone(),
            self.mailbox.clone(),
            self.router.clone(),
            ProcessingDaemonConfig::with_interval(interval),
        )
    }

    fn outcomes(&self) -> Vec<OutcomePayload> {
        self.router
            .sent_to(SUPERVISOR)
            .iter()
            .map(|m| OutcomePayload::decode(&m.subject, &m.body).unwrap())
            .collect()
    }

    fn cycles(&self) -> usize {
        self.log.count_prefix("store:list")
    }
}

#[tokio::test]
async fn test_success_closes_and_emits_merged() {
    let h = Harness::new();
    h.store.insert(record("R", "nux", 2, Duration::minutes(5)));
    let daemon = h.daemon(StdDuration::from_secs(60));

    let report = daemon.process_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.attempted, 1);
    assert_eq!(report.merged, 1);

    let stored = h.store.get("R").unwrap();
    assert_eq!(stored.status, MergeRequestStatus::Closed);
    assert_eq!(stored.close_reason.as_deref(), Some("merged"));

    match h.outcomes().as_slice() {
        [OutcomePayload::Merged(p)] => {
            assert_eq!(p.worker, "nux");
            assert_eq!(p.merge_commit, "abc123");
            assert_eq!(p.target_branch, "main");
        }
        other => panic!("expected one Merged outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_conflict_reopens_and_requests_rework() {
    let h = Harness::new();
    h.store.insert(record("R", "nux", 2, Duration::minutes(5)));
    h.engine.fail(
        "polecat/nux",
        MergeFailure::conflict(vec!["a.go".to_string(), "b.go".to_string()]),
    );
    let daemon = h.daemon(StdDuration::from_secs(60));

    let report = daemon.process_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.failed, 1);

    let stored = h.store.get("R").unwrap();
    assert_eq!(stored.status, MergeRequestStatus::Open);
    assert_eq!(stored.close_reason, None);
    assert_eq!(stored.retry_count(), 1);

    let sent = h.router.sent_to(SUPERVISOR);
    assert_eq!(sent[0].subject, ProtocolKind::ReworkRequest.subject("nux"));
    assert_eq!(sent[0].priority, MessagePriority::High);
    match h.outcomes().as_slice() {
        [OutcomePayload::ReworkRequest(p)] => {
            assert_eq!(p.conflict_files, vec!["a.go".to_string(), "b.go".to_string()]);
        }
        other => panic!("expected one ReworkRequest outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_non_recoverable_failure_rejects() {
    let h = Harness::new();
    h.store.insert(record("R", "nux", 2, Duration::minutes(5)));
    h.engine.fail(
        "polecat/nux",
        MergeFailure::new(FailureKind::BranchNotFound, "branch 'polecat/nux' not found"),
    );
    let daemon = h.daemon(StdDuration::from_secs(60));

    daemon.process_cycle(CycleTrigger::Timer).await;

    let stored = h.store.get("R").unwrap();
    assert_eq!(stored.status, MergeRequestStatus::Closed);
    assert_eq!(
        stored
            .close_reason
            .as_deref()
            .and_then(CloseReason::parse_store_text),
        Some(CloseReason::Rejected)
    );
    match h.outcomes().as_slice() {
        [OutcomePayload::MergeFailed(p)] => {
            assert_eq!(p.failure_kind, FailureKind::BranchNotFound);
            assert!(p.error.contains("not found"));
        }
        other => panic!("expected one MergeFailed outcome, got {other:?}"),
    }
}

#[tokio::test]
async fn test_processes_in_priority_order() {
    let h = Harness::new();
    h.store.insert(record("low", "a", 3, Duration::hours(2)));
    h.store.insert(record("high", "b", 0, Duration::minutes(1)));
    h.store.insert(record("mid", "c", 2, Duration::minutes(1)));
    let daemon = h.daemon(StdDuration::from_secs(60));

    daemon.process_cycle(CycleTrigger::Timer).await;

    let merges: Vec<_> = h
        .log
        .entries()
        .into_iter()
        .filter(|e| e.starts_with("merge:"))
        .collect();
    assert_eq!(merges, vec!["merge:high", "merge:mid", "merge:low"]);
}

#[tokio::test]
async fn test_store_error_on_disposition_still_emits_outcome() {
    let h = Harness::new();
    h.store.insert(record("R", "nux", 2, Duration::minutes(5)));
    h.store.fail_writes.store(true, Ordering::SeqCst);
    let daemon = h.daemon(StdDuration::from_secs(60));

    let report = daemon.process_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.merged, 1);
    assert_eq!(h.outcomes().len(), 1);
    assert_eq!(h.store.get("R").unwrap().status, MergeRequestStatus::Open);
}

#[tokio::test]
async fn test_queue_failure_ends_cycle() {
    let h = Harness::new();
    h.store.insert(record("R", "nux", 2, Duration::minutes(5)));
    h.store.fail_listing.store(true, Ordering::SeqCst);
    let daemon = h.daemon(StdDuration::from_secs(60));

    let report = daemon.process_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.attempted, 0);
    assert!(h.router.sent().is_empty());
}

#[tokio::test]
async fn test_drain_forwards_unknown_and_marks_all_read() {
    let h = Harness::new();
    let ready = h.mailbox.deliver("rig/nux", "MERGE_READY nux", "Branch: polecat/nux");
    let other = h.mailbox.deliver("rig/nux", "HELP", "I am stuck");
    let daemon = h.daemon(StdDuration::from_secs(60));

    let report = daemon.process_cycle(CycleTrigger::Wakeup).await;
    assert_eq!(report.drained, 2);
    assert_eq!(report.merge_ready, 1);
    assert_eq!(report.forwarded, 1);
    assert!(h.mailbox.is_read(&ready));
    assert!(h.mailbox.is_read(&other));

    let forwarded = h.router.sent_to(OVERSEER);
    assert_eq!(forwarded.len(), 1);
    assert_eq!(forwarded[0].subject, "[FWD from refinery] HELP");
    assert!(forwarded[0].body.contains("From: rig/nux"));
    assert!(forwarded[0].body.contains("Subject: HELP"));
    assert!(forwarded[0].body.ends_with("I am stuck"));
}

#[tokio::test]
async fn test_failed_forward_still_marks_read() {
    let h = Harness::new();
    let id = h.mailbox.deliver("rig/nux", "HELP", "I am stuck");
    h.router.fail.store(true, Ordering::SeqCst);
    let daemon = h.daemon(StdDuration::from_secs(60));

    let report = daemon.process_cycle(CycleTrigger::Wakeup).await;
    assert_eq!(report.forwarded, 0);
    assert!(h.mailbox.is_read(&id));
    assert_eq!(h.mailbox.unread_count(), 0);
}

#[tokio::test]
async fn test_drain_happens_before_dispatch() {
    let h = Harness::new();
    h.store.insert(record("R", "nux", 2, Duration::minutes(5)));
    h.mailbox.deliver("rig/nux", "HELP", "");
    let daemon = h.daemon(StdDuration::from_secs(60));

    daemon.process_cycle(CycleTrigger::Wakeup).await;

    let entries = h.log.entries();
    let forward = entries
        .iter()
        .position(|e| e.starts_with("send:mayor/"))
        .unwrap();
    let merge = entries.iter().position(|e| e == "merge:R").unwrap();
    assert!(forward < merge);
}

#[tokio::test]
async fn test_shutdown_is_observed_between_entries() {
    let h = Harness::new();
    h.store.insert(record("first", "a", 0, Duration::minutes(1)));
    h.store.insert(record("second", "b", 4, Duration::minutes(1)));
    let daemon = h.daemon(StdDuration::from_secs(60));

    let handle = daemon.handle();
    h.engine.after_merge(move || handle.shutdown());

    let report = daemon.process_cycle(CycleTrigger::Timer).await;
    assert_eq!(report.attempted, 1);
    assert!(report.interrupted);
    assert_eq!(h.store.get("first").unwrap().status, MergeRequestStatus::Closed);
    assert_eq!(h.store.get("second").unwrap().status, MergeRequestStatus::Open);
}

#[tokio::test]
async fn test_startup_cycle_and_shutdown() {
    let h = Harness::new();
    h.store.insert(record("R", "nux", 2, Duration::minutes(5)));
    let daemon = Arc::new(h.daemon(StdDuration::from_secs(3600)));
    let handle = daemon.handle();

    let runner = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });

    assert!(wait_for(|| h.store.get("R").unwrap().status == MergeRequestStatus::Closed, 2000).await);

    handle.shutdown();
    tokio::time::timeout(StdDuration::from_secs(2), runner)
        .await
        .expect("daemon did not stop")
        .unwrap();

    let status = handle.status().await;
    assert!(!status.running);
    assert_eq!(status.cycles, 1);
    assert_eq!(status.merged, 1);
}

#[tokio::test]
async fn test_wakeup_runs_cycle_before_timer() {
    let h = Harness::new();
    let daemon = Arc::new(h.daemon(StdDuration::from_secs(3600)));
    let handle = daemon.handle();
    let runner = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });
    assert!(wait_for(|| h.cycles() == 1, 2000).await);

    let id = h.mailbox.deliver("rig/nux", "MERGE_READY nux", "");
    handle.wake();

    assert!(wait_for(|| h.mailbox.is_read(&id), 2000).await);
    assert!(wait_for(|| h.cycles() == 2, 2000).await);

    handle.shutdown();
    runner.await.unwrap();

    let status = handle.status().await;
    assert_eq!(status.cycles, 2);
    assert_eq!(status.timer_resets, 1);
}

#[tokio::test]
async fn test_wakeups_coalesce_while_busy() {
    let h = Harness::new();
    let daemon = Arc::new(h.daemon(StdDuration::from_secs(3600)));
    let handle = daemon.handle();

    // Several wakeups before the loop starts waiting collapse into one cycle.
    handle.wake();
    handle.wake();
    handle.wake();

    let runner = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });
    assert!(wait_for(|| h.cycles() == 2, 2000).await);
    tokio::time::sleep(StdDuration::from_millis(200)).await;
    assert_eq!(h.cycles(), 2);

    handle.shutdown();
    runner.await.unwrap();
}

#[tokio::test]
async fn test_timer_is_reset_after_wakeup_cycle() {
    let h = Harness::new();
    let daemon = Arc::new(h.daemon(StdDuration::from_millis(1000)));
    let handle = daemon.handle();
    let runner = tokio::spawn({
        let daemon = daemon.clone();
        async move { daemon.run().await }
    });
    assert!(wait_for(|| h.cycles() == 1, 500).await);

    // Wake at ~500ms; the timer that was due at ~1000ms moves to ~1500ms.
    tokio::time::sleep(StdDuration::from_millis(500)).await;
    handle.wake();
    assert!(wait_for(|| h.cycles() == 2, 200).await);

    tokio::time::sleep(StdDuration::from_millis(650)).await;
    assert_eq!(h.cycles(), 2, "timer fired on its original deadline");

    assert!(wait_for(|| h.cycles() == 3, 1500).await);

    handle.shutdown();
    runner.await.unwrap();
}
