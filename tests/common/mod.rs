//! Common test utilities for integration tests
//!
//! In-memory implementations of the port traits with a shared call log so
//! tests can assert on the order of side effects across collaborators.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use refinery::domain::errors::{DomainError, DomainResult};
use refinery::domain::models::{
    CloseReason, InboundMessage, MergeRequest, MergeRequestStatus, OutboundMessage, RigConfig,
};
use refinery::domain::ports::{
    Mailbox, MergeEngine, MergeFailure, MergeOutcome, MessageRouter, ReclamationResult,
    RequestRecord, RequestStore, WorkspaceReclaimer, META_RETRY_COUNT,
};
use refinery::services::{PriorityScorer, RequestQueue};

/// Ordered record of side effects across fakes.
#[derive(Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count_prefix(&self, prefix: &str) -> usize {
        self.entries().iter().filter(|e| e.starts_with(prefix)).count()
    }
}

pub fn rig() -> RigConfig {
    RigConfig {
        name: "gastown".to_string(),
        ..RigConfig::default()
    }
}

/// An open record created `age` ago.
pub fn record(id: &str, worker: &str, priority: u8, age: Duration) -> RequestRecord {
    RequestRecord {
        id: id.to_string(),
        branch: format!("polecat/{worker}"),
        target_branch: "main".to_string(),
        worker: worker.to_string(),
        source_issue: format!("gt-{id}"),
        priority,
        status: MergeRequestStatus::Open,
        close_reason: None,
        created_at: Some(Utc::now() - age),
        metadata: BTreeMap::new(),
    }
}

#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<Vec<RequestRecord>>,
    pub fail_listing: AtomicBool,
    pub fail_writes: AtomicBool,
    /// Return closed rows from `list_open_requests` as well.
    pub leak_closed: AtomicBool,
    log: CallLog,
}

impl MemoryStore {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn insert(&self, record: RequestRecord) {
        self.records.lock().unwrap().push(record);
    }

    pub fn get(&self, id: &str) -> Option<RequestRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    fn check_writable(&self) -> DomainResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(DomainError::StoreUnavailable("store is read-only".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn list_open_requests(&self) -> DomainResult<Vec<RequestRecord>> {
        self.log.push("store:list");
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(DomainError::StoreUnavailable("connection refused".to_string()));
        }
        let leak_closed = self.leak_closed.load(Ordering::SeqCst);
        Ok(self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| leak_closed || r.status == MergeRequestStatus::Open)
            .cloned()
            .collect())
    }

    async fn get_request(&self, id_or_branch: &str) -> DomainResult<Option<RequestRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .find(|r| r.id == id_or_branch)
            .or_else(|| records.iter().rev().find(|r| r.branch == id_or_branch))
            .cloned())
    }

    async fn close(&self, id: &str, reason: &str) -> DomainResult<()> {
        self.check_writable()?;
        self.log.push(format!("store:close:{id}:{reason}"));
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DomainError::NotFound(id.to_string()))?;
        if record.status != MergeRequestStatus::Closed {
            record.status = MergeRequestStatus::Closed;
            record.close_reason = Some(reason.to_string());
        }
        Ok(())
    }

    async fn reopen(&self, id: &str) -> DomainResult<()> {
        self.check_writable()?;
        self.log.push(format!("store:reopen:{id}"));
        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| DomainError::NotFound(id.to_string()))?;
        if record.status == MergeRequestStatus::Closed {
            return Err(DomainError::ClosedImmutable {
                id: id.to_string(),
                reason: record
                    .close_reason
                    .as_deref()
                    .and_then(CloseReason::parse_store_text)
                    .unwrap_or(CloseReason::Merged),
            });
        }
        record.status = MergeRequestStatus::Open;
        let retries = record.retry_count() + 1;
        record
            .metadata
            .insert(META_RETRY_COUNT.to_string(), retries.to_string());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryMailbox {
    messages: Mutex<Vec<InboundMessage>>,
    next_id: Mutex<u32>,
}

impl MemoryMailbox {
    pub fn deliver(&self, from: &str, subject: &str, body: &str) -> String {
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = format!("msg-{next}");
        self.messages.lock().unwrap().push(InboundMessage {
            id: id.clone(),
            from: from.to_string(),
            to: "gastown/refinery".to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
            read: false,
        });
        id
    }

    pub fn is_read(&self, id: &str) -> bool {
        self.messages
            .lock()
            .unwrap()
            .iter()
            .any(|m| m.id == id && m.read)
    }

    pub fn unread_count(&self) -> usize {
        self.messages.lock().unwrap().iter().filter(|m| !m.read).count()
    }
}

#[async_trait]
impl Mailbox for MemoryMailbox {
    async fn list_unread(&self) -> DomainResult<Vec<InboundMessage>> {
        Ok(self
            .messages
            .lock()
            .unwrap()
            .iter()
            .filter(|m| !m.read)
            .cloned()
            .collect())
    }

    async fn mark_read(&self, id: &str) -> DomainResult<()> {
        let mut messages = self.messages.lock().unwrap();
        let msg = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or_else(|| DomainError::NotFound(id.to_string()))?;
        msg.read = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingRouter {
    sent: Mutex<Vec<OutboundMessage>>,
    pub fail: AtomicBool,
    log: CallLog,
}

impl RecordingRouter {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<OutboundMessage> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_to(&self, to: &str) -> Vec<OutboundMessage> {
        self.sent().into_iter().filter(|m| m.to == to).collect()
    }
}

#[async_trait]
impl MessageRouter for RecordingRouter {
    async fn send(&self, message: OutboundMessage) -> DomainResult<()> {
        self.log.push(format!("send:{}:{}", message.to, message.subject));
        if self.fail.load(Ordering::SeqCst) {
            return Err(DomainError::Notification {
                recipient: message.to,
                reason: "mail server down".to_string(),
            });
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

type MergeHook = Box<dyn Fn() + Send + Sync>;

/// Merge engine returning scripted outcomes per branch; merges by default.
#[derive(Default)]
pub struct ScriptedEngine {
    outcomes: Mutex<HashMap<String, MergeOutcome>>,
    after_merge: Mutex<Option<MergeHook>>,
    log: CallLog,
}

impl ScriptedEngine {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    pub fn script(&self, branch: &str, outcome: MergeOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .insert(branch.to_string(), outcome);
    }

    pub fn fail(&self, branch: &str, failure: MergeFailure) {
        self.script(branch, MergeOutcome::Failed(failure));
    }

    /// Run `hook` after every merge attempt.
    pub fn after_merge(&self, hook: impl Fn() + Send + Sync + 'static) {
        *self.after_merge.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl MergeEngine for ScriptedEngine {
    async fn merge(&self, request: &MergeRequest) -> MergeOutcome {
        self.log.push(format!("merge:{}", request.id));
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .get(&request.branch)
            .cloned()
            .unwrap_or_else(|| MergeOutcome::Merged {
                merge_commit: "abc123".to_string(),
            });
        if let Some(hook) = self.after_merge.lock().unwrap().as_ref() {
            hook();
        }
        outcome
    }
}

pub struct FakeReclaimer {
    result: Mutex<ReclamationResult>,
    log: CallLog,
}

impl FakeReclaimer {
    pub fn new(log: CallLog, result: ReclamationResult) -> Self {
        Self {
            result: Mutex::new(result),
            log,
        }
    }

    pub fn calls(&self) -> usize {
        self.log.count_prefix("reclaim:")
    }
}

#[async_trait]
impl WorkspaceReclaimer for FakeReclaimer {
    async fn reclaim(&self, worker: &str) -> ReclamationResult {
        self.log.push(format!("reclaim:{worker}"));
        self.result.lock().unwrap().clone()
    }
}

/// Queue over the given store and router with default weights.
pub fn queue_over(store: Arc<MemoryStore>, router: Arc<RecordingRouter>) -> RequestQueue {
    RequestQueue::new(store, router, PriorityScorer::new(), rig())
}

/// Poll `predicate` every 20ms until true or `timeout_ms` elapses.
pub async fn wait_for<F>(mut predicate: F, timeout_ms: u64) -> bool
where
    F: FnMut() -> bool,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_millis(timeout_ms);

    while start.elapsed() < timeout {
        if predicate() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    predicate()
}

pub fn ago(minutes: i64) -> DateTime<Utc> {
    Utc::now() - Duration::minutes(minutes)
}
