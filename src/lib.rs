//! Refinery - priority merge queue for autonomous worker pools
//!
//! Workers finish units of work on isolated branches. A coordinator role
//! integrates those branches into a shared target in priority order, and a
//! supervisor role reacts to the outcomes by notifying workers and
//! reclaiming their workspaces.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): merge requests, protocol payloads, errors and port traits
//! - **Service Layer** (`services`): priority scorer, request queue, processing daemon, outcome handler
//! - **Adapters** (`adapters`): SQLite request store and mailbox, git merge engine and reclaimer
//! - **Infrastructure Layer** (`infrastructure`): configuration, logging, liveness marker
//! - **CLI Layer** (`cli`): command-line interface
//!
//! # Example
//!
//! ```ignore
//! use refinery::services::{ProcessingDaemon, ProcessingDaemonConfig};
//!
//! let daemon = ProcessingDaemon::new(queue, engine, mailbox, router, ProcessingDaemonConfig::default());
//! let handle = daemon.handle();
//! tokio::spawn(async move { daemon.run().await });
//! handle.wake();
//! ```

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::errors::{DomainError, DomainResult};
pub use domain::models::{
    CloseReason, Config, Disposition, FailureKind, MergeRequest, MergeRequestStatus,
    OutcomePayload, ProtocolKind, QueueItem, ScoreInput, ScoringWeights,
};
pub use domain::ports::{
    Mailbox, MergeEngine, MergeFailure, MergeOutcome, MessageRouter, ReclamationResult,
    RequestRecord, RequestStore, WorkspaceReclaimer,
};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{
    OutcomeHandler, PriorityScorer, ProcessingDaemon, ProcessingDaemonConfig, RequestQueue,
    SupervisorInbox,
};
