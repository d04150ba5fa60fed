//! Daemon process management: liveness marker and control signals.

pub mod pid_file;

pub use pid_file::{is_process_alive, send_signal, DaemonSignal, PidFile, PidFileGuard, PID_FILE_NAME};
