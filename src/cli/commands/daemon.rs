//! `refinery daemon`: run the processing daemon.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use tracing::info;

use super::RigContext;
use crate::adapters::git::GitMergeEngine;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::process::PidFile;
use crate::services::{CycleReport, CycleTrigger, DaemonStatus, ProcessingDaemon, ProcessingDaemonConfig};

#[derive(Args, Debug)]
pub struct DaemonArgs {
    /// Safety-net poll interval in seconds (overrides daemon.poll_interval_secs)
    #[arg(long)]
    pub interval: Option<u64>,

    /// Run a single cycle and exit
    #[arg(long)]
    pub once: bool,
}

#[derive(Debug, Serialize)]
pub struct CycleOutput {
    pub trigger: String,
    pub drained: usize,
    pub merge_ready: usize,
    pub forwarded: usize,
    pub attempted: usize,
    pub merged: usize,
    pub failed: usize,
    pub interrupted: bool,
}

impl From<&CycleReport> for CycleOutput {
    fn from(r: &CycleReport) -> Self {
        Self {
            trigger: format!("{:?}", r.trigger).to_lowercase(),
            drained: r.drained,
            merge_ready: r.merge_ready,
            forwarded: r.forwarded,
            attempted: r.attempted,
            merged: r.merged,
            failed: r.failed,
            interrupted: r.interrupted,
        }
    }
}

impl CommandOutput for CycleOutput {
    fn to_human(&self) -> String {
        format!(
            "Cycle ({}): drained {} message(s), {} forwarded; attempted {} request(s), {} merged, {} failed{}",
            self.trigger,
            self.drained,
            self.forwarded,
            self.attempted,
            self.merged,
            self.failed,
            if self.interrupted { " (interrupted)" } else { "" },
        )
    }
}

#[derive(Debug, Serialize)]
pub struct DaemonSummaryOutput {
    pub cycles: u64,
    pub merged: u64,
    pub failed: u64,
    pub forwarded: u64,
    pub wakeup: Option<String>,
    pub last_cycle_at: Option<String>,
}

impl From<&DaemonStatus> for DaemonSummaryOutput {
    fn from(s: &DaemonStatus) -> Self {
        Self {
            cycles: s.cycles,
            merged: s.merged,
            failed: s.failed,
            forwarded: s.forwarded,
            wakeup: s.wakeup.map(|w| w.as_str().to_string()),
            last_cycle_at: s.last_cycle_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl CommandOutput for DaemonSummaryOutput {
    fn to_human(&self) -> String {
        format!(
            "Daemon stopped after {} cycle(s): {} merged, {} failed, {} forwarded",
            self.cycles, self.merged, self.failed, self.forwarded
        )
    }
}

pub async fn execute(args: DaemonArgs, config: Config, json_mode: bool) -> Result<()> {
    let pid_file = PidFile::new(&config.rig.runtime_dir);
    let _guard = pid_file.acquire().context("Cannot start the processing daemon")?;

    let mut daemon_config = ProcessingDaemonConfig::from_config(&config);
    if let Some(secs) = args.interval {
        daemon_config.poll_interval = Duration::from_secs(secs.max(1));
    }

    let engine = Arc::new(GitMergeEngine::new(&config.rig.repo_path, config.engine.clone()));
    let rig = RigContext::open(config).await?;
    let mail = Arc::new(rig.mail.clone());

    let daemon = ProcessingDaemon::new(
        rig.queue.clone(),
        engine,
        mail.clone(),
        mail,
        daemon_config,
    );

    if args.once {
        let report = daemon.process_cycle(CycleTrigger::Startup).await;
        output(&CycleOutput::from(&report), json_mode);
        return Ok(());
    }

    info!(pid = std::process::id(), "starting processing daemon");
    daemon.run().await;

    let status = daemon.status().await;
    output(&DaemonSummaryOutput::from(&status), json_mode);
    Ok(())
}
