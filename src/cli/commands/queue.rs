//! Merge queue commands: `queue`, `submit` and `reject`.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::Serialize;
use tracing::debug;

use super::RigContext;
use crate::adapters::sqlite::NewRequest;
use crate::cli::output::{list_table, output, truncate, CommandOutput};
use crate::domain::models::{Config, MergeRequest, OutboundMessage, ProtocolKind, QueueItem};
use crate::domain::ports::{MessageRouter, META_CONVOY_CREATED_AT, META_CONVOY_ID};
use crate::infrastructure::process::{send_signal, DaemonSignal, PidFile};

#[derive(Args, Debug)]
pub struct SubmitArgs {
    /// Source branch to integrate
    pub branch: String,

    /// Worker that produced the branch (defaults to the branch name minus the worker prefix)
    #[arg(short, long)]
    pub worker: Option<String>,

    /// Work item the branch resolves
    #[arg(short, long, default_value = "")]
    pub issue: String,

    /// Target branch (defaults to rig.default_branch)
    #[arg(short, long)]
    pub target: Option<String>,

    /// Priority tier, 0 (most urgent) to 4
    #[arg(short, long, default_value = "2", value_parser = clap::value_parser!(u8).range(0..=4))]
    pub priority: u8,

    /// Parent convoy identifier
    #[arg(long)]
    pub convoy: Option<String>,

    /// Parent convoy creation time (RFC 3339, defaults to now when --convoy is set)
    #[arg(long, requires = "convoy")]
    pub convoy_created_at: Option<DateTime<Utc>>,
}

#[derive(Args, Debug)]
pub struct RejectArgs {
    /// Merge request id, branch or worker name
    pub id: String,

    /// Reason given to the worker
    #[arg(short, long, required_unless_present = "superseded_by")]
    pub reason: Option<String>,

    /// Close as superseded by another request or branch instead of rejecting
    #[arg(long, conflicts_with_all = ["reason", "no_notify"])]
    pub superseded_by: Option<String>,

    /// Do not notify the worker
    #[arg(long)]
    pub no_notify: bool,
}

#[derive(Debug, Serialize)]
pub struct QueueEntryOutput {
    pub position: usize,
    pub id: String,
    pub score: f64,
    pub branch: String,
    pub target_branch: String,
    pub worker: String,
    pub issue: String,
    pub age: String,
}

impl From<&QueueItem> for QueueEntryOutput {
    fn from(item: &QueueItem) -> Self {
        Self {
            position: item.position,
            id: item.mr.id.clone(),
            score: item.score,
            branch: item.mr.branch.clone(),
            target_branch: item.mr.target_branch.clone(),
            worker: item.mr.worker.clone(),
            issue: item.mr.source_issue.clone(),
            age: item.age.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueueOutput {
    pub entries: Vec<QueueEntryOutput>,
    pub total: usize,
}

impl CommandOutput for QueueOutput {
    fn to_human(&self) -> String {
        if self.entries.is_empty() {
            return "Merge queue is empty.".to_string();
        }

        let mut table = list_table(&["pos", "id", "score", "branch", "target", "worker", "issue", "age"]);
        for e in &self.entries {
            table.add_row(vec![
                e.position.to_string(),
                e.id.clone(),
                format!("{:.1}", e.score),
                truncate(&e.branch, 32),
                e.target_branch.clone(),
                e.worker.clone(),
                e.issue.clone(),
                e.age.clone(),
            ]);
        }
        format!("{} request(s) in queue:\n{table}", self.total)
    }
}

#[derive(Debug, Serialize)]
pub struct RequestActionOutput {
    pub success: bool,
    pub message: String,
    pub id: String,
    pub branch: String,
    pub status: String,
}

impl RequestActionOutput {
    fn from_mr(message: String, mr: &MergeRequest) -> Self {
        Self {
            success: true,
            message,
            id: mr.id.clone(),
            branch: mr.branch.clone(),
            status: mr.status.to_string(),
        }
    }
}

impl CommandOutput for RequestActionOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn show_queue(config: Config, json_mode: bool) -> Result<()> {
    let rig = RigContext::open(config).await?;
    let items = rig.queue.queue().await.context("Failed to read the merge queue")?;

    let out = QueueOutput {
        total: items.len(),
        entries: items.iter().map(QueueEntryOutput::from).collect(),
    };
    output(&out, json_mode);
    Ok(())
}

pub async fn submit(args: SubmitArgs, config: Config, json_mode: bool) -> Result<()> {
    let runtime_dir = config.rig.runtime_dir.clone();
    let rig = RigContext::open(config).await?;
    let prefix = &rig.config.rig.worker_branch_prefix;

    let worker = args.worker.unwrap_or_else(|| {
        args.branch
            .strip_prefix(prefix.as_str())
            .unwrap_or(&args.branch)
            .to_string()
    });
    let target_branch = args
        .target
        .unwrap_or_else(|| rig.config.rig.default_branch.clone());

    let mut metadata = BTreeMap::new();
    if let Some(convoy) = args.convoy {
        let created = args.convoy_created_at.unwrap_or_else(Utc::now);
        metadata.insert(META_CONVOY_ID.to_string(), convoy);
        metadata.insert(META_CONVOY_CREATED_AT.to_string(), created.to_rfc3339());
    }

    let id = rig
        .store
        .submit(NewRequest {
            branch: args.branch.clone(),
            target_branch: target_branch.clone(),
            worker: worker.clone(),
            source_issue: args.issue.clone(),
            priority: args.priority,
            metadata,
        })
        .await
        .context("Failed to submit merge request")?;

    let ready = OutboundMessage::new(
        rig.config.rig.worker_address(&worker),
        rig.coordinator_address(),
        ProtocolKind::MergeReady.subject(&worker),
        format!("Branch: {}\nIssue: {}\nTarget: {target_branch}\nMR: {id}", args.branch, args.issue),
    );
    if let Err(e) = rig.mail.send(ready).await {
        debug!(error = %e, "MERGE_READY notice not delivered");
    }

    if let Some(pid) = PidFile::new(&runtime_dir).running_pid() {
        if let Err(e) = send_signal(pid, DaemonSignal::Wakeup) {
            debug!(pid, error = %e, "daemon wakeup failed");
        }
    }

    let out = RequestActionOutput {
        success: true,
        message: format!("Submitted {id}: {} -> {target_branch}", args.branch),
        id,
        branch: args.branch,
        status: "open".to_string(),
    };
    output(&out, json_mode);
    Ok(())
}

pub async fn reject(args: RejectArgs, config: Config, json_mode: bool) -> Result<()> {
    let rig = RigContext::open(config).await?;

    let out = match (&args.superseded_by, &args.reason) {
        (Some(by), _) => {
            let mr = rig
                .queue
                .supersede_mr(&args.id, by)
                .await
                .with_context(|| format!("Failed to supersede {}", args.id))?;
            RequestActionOutput::from_mr(
                format!("Superseded {} ({}) by {by}", mr.id, mr.branch),
                &mr,
            )
        }
        (None, Some(reason)) => {
            let mr = rig
                .queue
                .reject_mr(&args.id, reason, !args.no_notify)
                .await
                .with_context(|| format!("Failed to reject {}", args.id))?;
            RequestActionOutput::from_mr(
                format!("Rejected {} ({}): {reason}", mr.id, mr.branch),
                &mr,
            )
        }
        (None, None) => anyhow::bail!("either --reason or --superseded-by is required"),
    };
    output(&out, json_mode);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_queue_output() {
        let out = QueueOutput {
            entries: vec![],
            total: 0,
        };
        assert_eq!(out.to_human(), "Merge queue is empty.");
    }

    #[test]
    fn test_queue_output_lists_entries() {
        let out = QueueOutput {
            entries: vec![QueueEntryOutput {
                position: 1,
                id: "mr-abc".to_string(),
                score: 1400.0,
                branch: "polecat/nux".to_string(),
                target_branch: "main".to_string(),
                worker: "nux".to_string(),
                issue: "gt-1".to_string(),
                age: "5m ago".to_string(),
            }],
            total: 1,
        };
        let text = out.to_human();
        assert!(text.contains("1 request(s)"));
        assert!(text.contains("mr-abc"));
        assert!(text.contains("1400.0"));

        let json = out.to_json();
        assert_eq!(json["entries"][0]["branch"], "polecat/nux");
    }
}
