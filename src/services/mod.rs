//! Service layer for the merge-queue pipeline
//!
//! Services coordinate the domain models through the port traits:
//! - Priority scoring and the request queue
//! - The coordinator's processing daemon
//! - The supervisor's outcome handler and inbox

pub mod outcome_handler;
pub mod priority_scorer;
pub mod processing_daemon;
pub mod request_queue;
pub mod side_effects;
pub mod supervisor_inbox;
pub mod wakeup;

pub use outcome_handler::{OutcomeHandler, WorkerDoneAction};
pub use priority_scorer::PriorityScorer;
pub use processing_daemon::{
    CycleReport, CycleTrigger, DaemonHandle, DaemonStatus, ProcessingDaemon,
    ProcessingDaemonConfig,
};
pub use request_queue::RequestQueue;
pub use side_effects::{run_side_effect, SideEffectPolicy};
pub use supervisor_inbox::{InboxReport, SupervisorInbox};
pub use wakeup::{TerminationSignals, WakeupCapability, WakeupNotifier, WakeupSource};
