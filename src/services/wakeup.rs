//! Wakeup and termination sources for the processing daemon.

use std::sync::Arc;

use tokio::sync::Notify;
use tracing::{debug, warn};

/// Single-slot wakeup notifier.
///
/// Wakeups that arrive while nobody is waiting collapse into one pending
/// permit, so a burst of signals during a cycle triggers exactly one extra
/// cycle.
#[derive(Debug, Clone, Default)]
pub struct WakeupNotifier {
    notify: Arc<Notify>,
}

impl WakeupNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request an immediate cycle.
    pub fn wake(&self) {
        self.notify.notify_one();
    }

    /// Wait for the next wakeup.
    pub async fn notified(&self) {
        self.notify.notified().await;
    }
}

/// What can wake the daemon besides its timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeupCapability {
    /// SIGUSR1 and in-process wakeups.
    Signal,
    /// In-process wakeups and the timer only.
    PollOnly,
}

impl WakeupCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Signal => "signal",
            Self::PollOnly => "poll-only",
        }
    }
}

/// Probe for the OS wakeup signal.
pub struct WakeupSource;

impl WakeupSource {
    /// Register SIGUSR1 to feed `notifier`, falling back to poll-only when the
    /// platform or runtime cannot deliver it.
    ///
    /// Must be called from within a tokio runtime.
    #[cfg(unix)]
    pub fn probe(notifier: &WakeupNotifier) -> WakeupCapability {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::user_defined1()) {
            Ok(mut stream) => {
                let notifier = notifier.clone();
                tokio::spawn(async move {
                    while stream.recv().await.is_some() {
                        debug!("SIGUSR1 received");
                        notifier.wake();
                    }
                });
                WakeupCapability::Signal
            }
            Err(e) => {
                warn!(error = %e, "cannot register SIGUSR1, using poll-only wakeup");
                WakeupCapability::PollOnly
            }
        }
    }

    #[cfg(not(unix))]
    pub fn probe(_notifier: &WakeupNotifier) -> WakeupCapability {
        debug!("no wakeup signal on this platform, using poll-only wakeup");
        WakeupCapability::PollOnly
    }
}

/// OS termination signals (SIGINT, SIGTERM; Ctrl-C elsewhere).
pub struct TerminationSignals {
    #[cfg(unix)]
    interrupt: tokio::signal::unix::Signal,
    #[cfg(unix)]
    terminate: tokio::signal::unix::Signal,
}

impl TerminationSignals {
    #[cfg(unix)]
    pub fn install() -> std::io::Result<Self> {
        use tokio::signal::unix::{signal, SignalKind};

        Ok(Self {
            interrupt: signal(SignalKind::interrupt())?,
            terminate: signal(SignalKind::terminate())?,
        })
    }

    #[cfg(not(unix))]
    pub fn install() -> std::io::Result<Self> {
        Ok(Self {})
    }

    /// Wait for a termination signal and return its name.
    #[cfg(unix)]
    pub async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }

    #[cfg(not(unix))]
    pub async fn recv(&mut self) -> &'static str {
        match tokio::signal::ctrl_c().await {
            Ok(()) => "ctrl-c",
            Err(_) => std::future::pending().await,
        }
    }
}

/// Wait on optional termination signals; never resolves when absent.
pub async fn wait_for_termination(signals: &mut Option<TerminationSignals>) -> &'static str {
    match signals {
        Some(signals) => signals.recv().await,
        None => std::future::pending().await,
    }
}
