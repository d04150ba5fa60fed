//! Daemon control commands: `status`, `stop` and `wake`.

use anyhow::{Context, Result};
use serde::Serialize;

use super::RigContext;
use crate::cli::output::{output, CommandOutput};
use crate::domain::models::Config;
use crate::infrastructure::process::{send_signal, DaemonSignal, PidFile};

#[derive(Debug, Serialize)]
pub struct StatusOutput {
    pub running: bool,
    pub pid: Option<u32>,
    pub pid_file: String,
    pub queue_length: usize,
    pub next: Option<String>,
}

impl CommandOutput for StatusOutput {
    fn to_human(&self) -> String {
        let daemon = match self.pid {
            Some(pid) if self.running => format!("running (PID {pid})"),
            _ => "not running".to_string(),
        };
        let mut lines = vec![
            format!("Daemon: {daemon}"),
            format!("Queue: {} open request(s)", self.queue_length),
        ];
        if let Some(ref next) = self.next {
            lines.push(format!("Next: {next}"));
        }
        lines.join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct SignalOutput {
    pub success: bool,
    pub message: String,
    pub pid: Option<u32>,
}

impl CommandOutput for SignalOutput {
    fn to_human(&self) -> String {
        self.message.clone()
    }
}

pub async fn status(config: Config, json_mode: bool) -> Result<()> {
    let pid_file = PidFile::new(&config.rig.runtime_dir);
    let pid = pid_file.running_pid();
    let pid_path = pid_file.path().display().to_string();

    let rig = RigContext::open(config).await?;
    let items = rig.queue.queue().await.context("Failed to read the merge queue")?;

    let out = StatusOutput {
        running: pid.is_some(),
        pid,
        pid_file: pid_path,
        queue_length: items.len(),
        next: items
            .first()
            .map(|item| format!("{} ({}, {})", item.mr.id, item.mr.branch, item.age)),
    };
    output(&out, json_mode);
    Ok(())
}

pub fn stop(config: &Config, json_mode: bool) -> Result<()> {
    signal_daemon(config, DaemonSignal::Terminate, "Stop requested", json_mode)
}

pub fn wake(config: &Config, json_mode: bool) -> Result<()> {
    signal_daemon(config, DaemonSignal::Wakeup, "Wakeup sent", json_mode)
}

fn signal_daemon(config: &Config, signal: DaemonSignal, done: &str, json_mode: bool) -> Result<()> {
    let pid_file = PidFile::new(&config.rig.runtime_dir);
    let out = match pid_file.running_pid() {
        Some(pid) => {
            send_signal(pid, signal)
                .with_context(|| format!("Failed to signal daemon (PID {pid})"))?;
            SignalOutput {
                success: true,
                message: format!("{done} (PID {pid})"),
                pid: Some(pid),
            }
        }
        None => SignalOutput {
            success: false,
            message: "Daemon is not running".to_string(),
            pid: None,
        },
    };
    output(&out, json_mode);
    Ok(())
}
