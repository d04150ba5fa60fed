//! Port trait definitions (Hexagonal Architecture)
//!
//! This module defines async trait interfaces that adapters must implement:
//! - RequestStore: merge-request persistence
//! - Mailbox / MessageRouter: inbound listing and outbound delivery
//! - MergeEngine: branch integration mechanics
//! - WorkspaceReclaimer: removal of a finished worker's checkout
//!
//! The services depend only on these contracts.

pub mod mailbox;
pub mod merge_engine;
pub mod request_store;
pub mod workspace_reclaimer;

pub use mailbox::{Mailbox, MessageRouter};
pub use merge_engine::{MergeEngine, MergeFailure, MergeOutcome};
pub use request_store::{
    RequestRecord, RequestStore, META_CONVOY_CREATED_AT, META_CONVOY_ID, META_RETRY_COUNT,
};
pub use workspace_reclaimer::{ReclamationResult, WorkspaceReclaimer};
