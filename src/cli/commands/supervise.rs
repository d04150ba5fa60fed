//! `refinery supervise`: react to outcome messages as the supervisor.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use super::RigContext;
use crate::adapters::git::GitWorkspaceReclaimer;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::services::{InboxReport, OutcomeHandler, SupervisorInbox};

#[derive(Args, Debug)]
pub struct SuperviseArgs {
    /// Keep draining the inbox until interrupted
    #[arg(long)]
    pub watch: bool,

    /// Seconds between drains in watch mode
    #[arg(long, default_value = "30")]
    pub interval: u64,
}

#[derive(Debug, Default, Serialize)]
pub struct InboxOutput {
    pub handled: usize,
    pub ignored: usize,
    pub failures: Vec<FailureOutput>,
}

#[derive(Debug, Serialize)]
pub struct FailureOutput {
    pub message_id: String,
    pub error: String,
}

impl InboxOutput {
    fn absorb(&mut self, report: InboxReport) {
        self.handled += report.handled;
        self.ignored += report.ignored;
        self.failures
            .extend(report.failures.into_iter().map(|(message_id, e)| FailureOutput {
                message_id,
                error: e.to_string(),
            }));
    }
}

impl CommandOutput for InboxOutput {
    fn to_human(&self) -> String {
        let mut lines = vec![format!(
            "Handled {} outcome message(s), ignored {}",
            self.handled, self.ignored
        )];
        for f in &self.failures {
            lines.push(format!("  {}: {}", f.message_id, f.error));
        }
        lines.join("\n")
    }
}

pub async fn execute(args: SuperviseArgs, config: Config, json_mode: bool) -> Result<()> {
    let rig = RigContext::open(config).await?;
    let supervisor = rig.supervisor_address();
    let mail = Arc::new(rig.mail.for_address(supervisor.clone()));

    let handler = OutcomeHandler::new(
        mail.clone(),
        Arc::new(GitWorkspaceReclaimer::from_rig(&rig.config.rig)),
        rig.config.rig.clone(),
    )
    .with_sender(supervisor)
    .with_remote(rig.config.engine.remote.clone());
    let inbox = SupervisorInbox::new(mail, Arc::new(handler));

    let mut totals = InboxOutput::default();
    if !args.watch {
        totals.absorb(inbox.drain().await.context("Failed to drain supervisor inbox")?);
        output(&totals, json_mode);
        return Ok(());
    }

    let mut ticker = tokio::time::interval(Duration::from_secs(args.interval.max(1)));
    info!(interval_secs = args.interval, "supervising outcome messages");
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => match inbox.drain().await {
                Ok(report) => totals.absorb(report),
                Err(e) => warn!(error = %e, "supervisor inbox drain failed"),
            },
        }
    }

    output(&totals, json_mode);
    Ok(())
}
