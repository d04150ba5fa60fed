//! Coordinator/supervisor protocol messages.
//!
//! Protocol messages are ordinary mail whose subject line names the message
//! kind followed by the worker, e.g. `MERGED nux`. Payload fields travel in the
//! body as `Key: value` lines. An `Error:` field, when present, is always last
//! and runs to the end of the body so multi-line error text survives.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::message::{InboundMessage, MessageCategory, MessagePriority, OutboundMessage};
use crate::domain::errors::{DomainError, DomainResult};

static SUBJECT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(MERGE_READY|MERGE_FAILED|MERGED|REWORK_REQUEST|WORKER_DONE)(?:\s+(\S+))?\s*$")
        .expect("protocol subject pattern is valid")
});

/// Kind of protocol message, recognized from the subject line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProtocolKind {
    /// A worker branch is ready for the merge queue.
    MergeReady,
    Merged,
    MergeFailed,
    ReworkRequest,
    WorkerDone,
    /// Anything the protocol does not recognize.
    Unknown,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MergeReady => "MERGE_READY",
            Self::Merged => "MERGED",
            Self::MergeFailed => "MERGE_FAILED",
            Self::ReworkRequest => "REWORK_REQUEST",
            Self::WorkerDone => "WORKER_DONE",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// Subject line for a message of this kind about `worker`.
    pub fn subject(&self, worker: &str) -> String {
        format!("{} {worker}", self.as_str())
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a message by its subject line.
pub fn classify(subject: &str) -> ProtocolKind {
    let Some(caps) = SUBJECT_PATTERN.captures(subject) else {
        return ProtocolKind::Unknown;
    };
    match &caps[1] {
        "MERGE_READY" => ProtocolKind::MergeReady,
        "MERGED" => ProtocolKind::Merged,
        "MERGE_FAILED" => ProtocolKind::MergeFailed,
        "REWORK_REQUEST" => ProtocolKind::ReworkRequest,
        "WORKER_DONE" => ProtocolKind::WorkerDone,
        _ => ProtocolKind::Unknown,
    }
}

/// Worker named in a protocol subject line, if any.
pub fn subject_worker(subject: &str) -> Option<String> {
    SUBJECT_PATTERN
        .captures(subject)
        .and_then(|caps| caps.get(2))
        .map(|m| m.as_str().to_string())
}

/// Why an integration attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The branch conflicts with the target.
    Conflict,
    /// Post-merge tests failed.
    Tests,
    Build,
    /// The merged result could not be pushed.
    Push,
    /// The source branch does not exist.
    BranchNotFound,
    Other,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Conflict => "conflict",
            Self::Tests => "tests",
            Self::Build => "build",
            Self::Push => "push",
            Self::BranchNotFound => "branch_not_found",
            Self::Other => "other",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "conflict" => Some(Self::Conflict),
            "tests" | "test" => Some(Self::Tests),
            "build" => Some(Self::Build),
            "push" => Some(Self::Push),
            "branch_not_found" => Some(Self::BranchNotFound),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    /// Whether the worker can fix the failure and resubmit the same request.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::BranchNotFound)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a worker session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitKind {
    Completed,
    Escalated,
    Deferred,
    PhaseComplete,
}

impl ExitKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "COMPLETED",
            Self::Escalated => "ESCALATED",
            Self::Deferred => "DEFERRED",
            Self::PhaseComplete => "PHASE_COMPLETE",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "COMPLETED" => Some(Self::Completed),
            "ESCALATED" => Some(Self::Escalated),
            "DEFERRED" => Some(Self::Deferred),
            "PHASE_COMPLETE" => Some(Self::PhaseComplete),
            _ => None,
        }
    }
}

/// How work in a convoy reaches the target branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Through the merge queue.
    Mr,
    /// Worker pushes straight to the target branch.
    Direct,
    /// Kept on a local branch.
    Local,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mr => "mr",
            Self::Direct => "direct",
            Self::Local => "local",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "mr" => Some(Self::Mr),
            "direct" => Some(Self::Direct),
            "local" => Some(Self::Local),
            _ => None,
        }
    }
}

/// A branch was integrated into its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedPayload {
    pub worker: String,
    pub branch: String,
    pub issue: String,
    pub target_branch: String,
    pub merge_commit: String,
}

/// An integration attempt failed for a reason other than conflicts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFailedPayload {
    pub worker: String,
    pub branch: String,
    pub issue: String,
    pub failure_kind: FailureKind,
    pub error: String,
}

/// A branch conflicts with its target and must be rebased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReworkRequestPayload {
    pub worker: String,
    pub branch: String,
    pub issue: String,
    pub target_branch: String,
    pub conflict_files: Vec<String>,
}

/// A worker finished its unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerDonePayload {
    pub worker: String,
    pub exit: ExitKind,
    pub issue: Option<String>,
    pub branch: String,
    pub convoy_id: Option<String>,
    /// The convoy is owned by the worker's own workflow.
    pub convoy_owned: bool,
    pub merge_strategy: Option<MergeStrategy>,
    /// Merge request created for the branch, if any.
    pub merge_request: Option<String>,
}

impl WorkerDonePayload {
    /// True when the worker already pushed to the target branch and closed
    /// its own work item, so no merge-queue outcome will follow.
    pub fn skip_integration_flow(&self) -> bool {
        self.convoy_owned && self.merge_strategy == Some(MergeStrategy::Direct)
    }
}

/// Any outcome message the supervisor reacts to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomePayload {
    Merged(MergedPayload),
    MergeFailed(MergeFailedPayload),
    ReworkRequest(ReworkRequestPayload),
    WorkerDone(WorkerDonePayload),
}

impl OutcomePayload {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            Self::Merged(_) => ProtocolKind::Merged,
            Self::MergeFailed(_) => ProtocolKind::MergeFailed,
            Self::ReworkRequest(_) => ProtocolKind::ReworkRequest,
            Self::WorkerDone(_) => ProtocolKind::WorkerDone,
        }
    }

    pub fn worker(&self) -> &str {
        match self {
            Self::Merged(p) => &p.worker,
            Self::MergeFailed(p) => &p.worker,
            Self::ReworkRequest(p) => &p.worker,
            Self::WorkerDone(p) => &p.worker,
        }
    }

    /// Encode the payload body as `Key: value` lines.
    pub fn encode_body(&self) -> String {
        let mut fields: Vec<(&str, String)> = Vec::new();
        let mut error = None;

        match self {
            Self::Merged(p) => {
                fields.push(("Worker", p.worker.clone()));
                fields.push(("Branch", p.branch.clone()));
                fields.push(("Issue", p.issue.clone()));
                fields.push(("Target", p.target_branch.clone()));
                fields.push(("MergeCommit", p.merge_commit.clone()));
            }
            Self::MergeFailed(p) => {
                fields.push(("Worker", p.worker.clone()));
                fields.push(("Branch", p.branch.clone()));
                fields.push(("Issue", p.issue.clone()));
                fields.push(("FailureType", p.failure_kind.as_str().to_string()));
                error = Some(p.error.as_str());
            }
            Self::ReworkRequest(p) => {
                fields.push(("Worker", p.worker.clone()));
                fields.push(("Branch", p.branch.clone()));
                fields.push(("Issue", p.issue.clone()));
                fields.push(("Target", p.target_branch.clone()));
                fields.push(("ConflictFiles", p.conflict_files.join(", ")));
            }
            Self::WorkerDone(p) => {
                fields.push(("Worker", p.worker.clone()));
                fields.push(("Exit", p.exit.as_str().to_string()));
                if let Some(issue) = &p.issue {
                    fields.push(("Issue", issue.clone()));
                }
                fields.push(("Branch", p.branch.clone()));
                if let Some(convoy) = &p.convoy_id {
                    fields.push(("ConvoyID", convoy.clone()));
                }
                fields.push(("ConvoyOwned", p.convoy_owned.to_string()));
                if let Some(strategy) = p.merge_strategy {
                    fields.push(("MergeStrategy", strategy.as_str().to_string()));
                }
                if let Some(mr) = &p.merge_request {
                    fields.push(("MR", mr.clone()));
                }
            }
        }

        let mut body = fields
            .into_iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join("\n");
        if let Some(error) = error {
            body.push_str("\nError: ");
            body.push_str(error);
        }
        body
    }

    /// Build the outbound message carrying this payload.
    pub fn to_message(&self, from: &str, to: &str) -> OutboundMessage {
        let priority = match self {
            Self::MergeFailed(_) | Self::ReworkRequest(_) => MessagePriority::High,
            Self::Merged(_) | Self::WorkerDone(_) => MessagePriority::Normal,
        };
        OutboundMessage::new(from, to, self.kind().subject(self.worker()), self.encode_body())
            .with_priority(priority)
            .with_category(MessageCategory::Notification)
    }

    /// Decode a payload from a protocol message.
    pub fn decode(subject: &str, body: &str) -> DomainResult<Self> {
        let kind = classify(subject);
        let fields = parse_fields(body);
        let worker = fields
            .get("Worker")
            .cloned()
            .or_else(|| subject_worker(subject))
            .ok_or_else(|| DomainError::Protocol(format!("{kind} message without worker")))?;

        let payload = match kind {
            ProtocolKind::Merged => Self::Merged(MergedPayload {
                worker,
                branch: required(&fields, "Branch", kind)?,
                issue: optional(&fields, "Issue").unwrap_or_default(),
                target_branch: required(&fields, "Target", kind)?,
                merge_commit: optional(&fields, "MergeCommit").unwrap_or_default(),
            }),
            ProtocolKind::MergeFailed => {
                let failure = required(&fields, "FailureType", kind)?;
                Self::MergeFailed(MergeFailedPayload {
                    worker,
                    branch: required(&fields, "Branch", kind)?,
                    issue: optional(&fields, "Issue").unwrap_or_default(),
                    failure_kind: FailureKind::from_str(&failure).unwrap_or(FailureKind::Other),
                    error: optional(&fields, "Error").unwrap_or_default(),
                })
            }
            ProtocolKind::ReworkRequest => Self::ReworkRequest(ReworkRequestPayload {
                worker,
                branch: required(&fields, "Branch", kind)?,
                issue: optional(&fields, "Issue").unwrap_or_default(),
                target_branch: required(&fields, "Target", kind)?,
                conflict_files: optional(&fields, "ConflictFiles")
                    .map(|files| {
                        files
                            .split(',')
                            .map(str::trim)
                            .filter(|f| !f.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
            }),
            ProtocolKind::WorkerDone => {
                let exit = required(&fields, "Exit", kind)?;
                Self::WorkerDone(WorkerDonePayload {
                    worker,
                    exit: ExitKind::from_str(&exit).ok_or_else(|| {
                        DomainError::Protocol(format!("unknown exit type '{exit}'"))
                    })?,
                    issue: optional(&fields, "Issue"),
                    branch: optional(&fields, "Branch").unwrap_or_default(),
                    convoy_id: optional(&fields, "ConvoyID"),
                    convoy_owned: optional(&fields, "ConvoyOwned")
                        .is_some_and(|v| v.eq_ignore_ascii_case("true")),
                    merge_strategy: optional(&fields, "MergeStrategy")
                        .and_then(|s| MergeStrategy::from_str(&s)),
                    merge_request: optional(&fields, "MR"),
                })
            }
            ProtocolKind::MergeReady | ProtocolKind::Unknown => {
                return Err(DomainError::Protocol(format!(
                    "subject '{subject}' does not carry an outcome payload"
                )));
            }
        };
        Ok(payload)
    }

    /// Decode a payload from an inbound message.
    pub fn from_message(msg: &InboundMessage) -> DomainResult<Self> {
        Self::decode(&msg.subject, &msg.body)
    }
}

fn parse_fields(body: &str) -> HashMap<String, String> {
    let mut fields = HashMap::new();
    let mut lines = body.lines();

    while let Some(line) = lines.next() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim();
        if key == "Error" {
            let mut error = value.trim_start().to_string();
            for rest in lines.by_ref() {
                error.push('\n');
                error.push_str(rest);
            }
            fields.insert(key.to_string(), error);
            break;
        }
        if !key.is_empty() && !key.contains(char::is_whitespace) {
            fields.insert(key.to_string(), value.trim().to_string());
        }
    }
    fields
}

fn optional(fields: &HashMap<String, String>, key: &str) -> Option<String> {
    fields.get(key).filter(|v| !v.is_empty()).cloned()
}

fn required(fields: &HashMap<String, String>, key: &str, kind: ProtocolKind) -> DomainResult<String> {
    optional(fields, key)
        .ok_or_else(|| DomainError::Protocol(format!("{kind} message missing field '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_subjects() {
        assert_eq!(classify("MERGE_READY nux"), ProtocolKind::MergeReady);
        assert_eq!(classify("MERGED nux"), ProtocolKind::Merged);
        assert_eq!(classify("MERGE_FAILED nux"), ProtocolKind::MergeFailed);
        assert_eq!(classify("REWORK_REQUEST nux"), ProtocolKind::ReworkRequest);
        assert_eq!(classify("WORKER_DONE nux"), ProtocolKind::WorkerDone);
    }

    #[test]
    fn test_classify_unknown_subjects() {
        assert_eq!(classify("Hello there"), ProtocolKind::Unknown);
        assert_eq!(classify("MERGEDX nux"), ProtocolKind::Unknown);
        assert_eq!(classify("Re: MERGED nux"), ProtocolKind::Unknown);
        assert_eq!(classify(""), ProtocolKind::Unknown);
    }

    #[test]
    fn test_subject_worker() {
        assert_eq!(subject_worker("MERGED nux").as_deref(), Some("nux"));
        assert_eq!(subject_worker("MERGE_READY"), None);
        assert_eq!(subject_worker("hello"), None);
    }

    #[test]
    fn test_multiline_error_survives() {
        let payload = OutcomePayload::MergeFailed(MergeFailedPayload {
            worker: "nux".into(),
            branch: "polecat/nux".into(),
            issue: "gt-1".into(),
            failure_kind: FailureKind::Tests,
            error: "2 tests failed\n  - a\n  - b".into(),
        });
        let msg = payload.to_message("rig/refinery", "rig/witness");
        assert_eq!(msg.subject, "MERGE_FAILED nux");
        assert_eq!(msg.priority, MessagePriority::High);

        let decoded = OutcomePayload::decode(&msg.subject, &msg.body).unwrap();
        assert_eq!(decoded, payload);
    }

    #[test]
    fn test_decode_rework_conflict_files() {
        let body = "Worker: nux\nBranch: polecat/nux\nIssue: gt-1\nTarget: main\nConflictFiles: a.go, b.go";
        let decoded = OutcomePayload::decode("REWORK_REQUEST nux", body).unwrap();
        match decoded {
            OutcomePayload::ReworkRequest(p) => {
                assert_eq!(p.conflict_files, vec!["a.go".to_string(), "b.go".to_string()]);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn test_decode_missing_required_field() {
        let err = OutcomePayload::decode("MERGED nux", "Worker: nux\nBranch: b").unwrap_err();
        assert!(matches!(err, DomainError::Protocol(msg) if msg.contains("Target")));
    }

    #[test]
    fn test_decode_worker_falls_back_to_subject() {
        let decoded =
            OutcomePayload::decode("WORKER_DONE toast", "Exit: COMPLETED\nBranch: polecat/toast")
                .unwrap();
        assert_eq!(decoded.worker(), "toast");
    }

    #[test]
    fn test_decode_merge_ready_is_not_an_outcome() {
        assert!(OutcomePayload::decode("MERGE_READY nux", "Worker: nux").is_err());
    }

    #[test]
    fn test_skip_integration_flow_requires_owned_direct() {
        let mut done = WorkerDonePayload {
            worker: "nux".into(),
            exit: ExitKind::Completed,
            issue: Some("gt-1".into()),
            branch: "polecat/nux".into(),
            convoy_id: Some("hq-cv-1".into()),
            convoy_owned: true,
            merge_strategy: Some(MergeStrategy::Direct),
            merge_request: None,
        };
        assert!(done.skip_integration_flow());

        done.convoy_owned = false;
        assert!(!done.skip_integration_flow());

        done.convoy_owned = true;
        done.merge_strategy = Some(MergeStrategy::Mr);
        assert!(!done.skip_integration_flow());

        done.merge_strategy = None;
        assert!(!done.skip_integration_flow());
    }

    #[test]
    fn test_failure_kind_recoverability() {
        assert!(FailureKind::Conflict.is_recoverable());
        assert!(FailureKind::Tests.is_recoverable());
        assert!(!FailureKind::BranchNotFound.is_recoverable());
    }
}
