pub mod config;
pub mod merge_request;
pub mod message;
pub mod protocol;
pub mod queue;

pub use config::{
    Config, DaemonConfig, DatabaseConfig, EngineConfig, LoggingConfig, RigConfig, ScoringWeights,
};
pub use merge_request::{CloseReason, Disposition, MergeRequest, MergeRequestStatus};
pub use message::{InboundMessage, MessageCategory, MessagePriority, OutboundMessage};
pub use protocol::{
    classify, ExitKind, FailureKind, MergeFailedPayload, MergeStrategy, MergedPayload,
    OutcomePayload, ProtocolKind, ReworkRequestPayload, WorkerDonePayload,
};
pub use queue::{format_age, QueueItem, ScoreInput};
