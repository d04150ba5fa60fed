//! Liveness marker for the single daemon instance.
//!
//! The marker is a file holding the daemon's PID. It counts as live only when
//! that process still exists; stale or unreadable markers are removed on sight.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::errors::{DomainError, DomainResult};

pub const PID_FILE_NAME: &str = "refinery.pid";

/// Signals the CLI sends to a running daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonSignal {
    /// Run a cycle now (SIGUSR1)
    Wakeup,
    /// Stop after the current request (SIGTERM)
    Terminate,
}

#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(runtime_dir: impl AsRef<Path>) -> Self {
        Self {
            path: runtime_dir.as_ref().join(PID_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// PID recorded in the marker, if it exists and parses.
    pub fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }

    /// PID of a live daemon. A marker naming a dead or unparseable PID is removed.
    pub fn running_pid(&self) -> Option<u32> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "cannot read liveness marker");
                return None;
            }
        };
        match contents.trim().parse() {
            Ok(pid) if is_process_alive(pid) => Some(pid),
            _ => {
                self.remove_stale();
                None
            }
        }
    }

    /// Write our PID, refusing when another live daemon holds the marker.
    pub fn acquire(&self) -> DomainResult<PidFileGuard> {
        if let Some(pid) = self.running_pid() {
            return Err(DomainError::AlreadyRunning(pid));
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // The marker appears fully written: stage it, then link it into place.
        let pid = std::process::id();
        let staged = self.path.with_file_name(format!(
            ".{PID_FILE_NAME}.{}.tmp",
            Uuid::new_v4().simple()
        ));
        let mut file = OpenOptions::new().write(true).create_new(true).open(&staged)?;
        let linked = writeln!(file, "{pid}")
            .and_then(|()| file.sync_all())
            .and_then(|()| fs::hard_link(&staged, &self.path));
        drop(file);
        if let Err(e) = fs::remove_file(&staged) {
            warn!(path = %staged.display(), error = %e, "failed to remove staged liveness marker");
        }
        match linked {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(DomainError::AlreadyRunning(self.read_pid().unwrap_or(0)));
            }
            Err(e) => return Err(e.into()),
        }
        debug!(path = %self.path.display(), pid, "liveness marker written");

        Ok(PidFileGuard {
            path: self.path.clone(),
            pid,
        })
    }

    fn remove_stale(&self) {
        match fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "removed stale liveness marker"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove stale liveness marker"),
        }
    }
}

/// Removes the marker on drop if it still names this process.
#[derive(Debug)]
pub struct PidFileGuard {
    path: PathBuf,
    pid: u32,
}

impl Drop for PidFileGuard {
    fn drop(&mut self) {
        let ours = fs::read_to_string(&self.path)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            == Some(self.pid);
        if ours {
            if let Err(e) = fs::remove_file(&self.path) {
                warn!(path = %self.path.display(), error = %e, "failed to remove liveness marker");
            }
        }
    }
}

#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    if raw <= 0 {
        return false;
    }
    match kill(Pid::from_raw(raw), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    pid == std::process::id()
}

#[cfg(unix)]
pub fn send_signal(pid: u32, signal: DaemonSignal) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let raw = i32::try_from(pid).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let signal = match signal {
        DaemonSignal::Wakeup => Signal::SIGUSR1,
        DaemonSignal::Terminate => Signal::SIGTERM,
    };
    kill(Pid::from_raw(raw), signal).map_err(io::Error::from)
}

#[cfg(not(unix))]
pub fn send_signal(_pid: u32, _signal: DaemonSignal) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "signalling the daemon requires a Unix platform",
    ))
}
