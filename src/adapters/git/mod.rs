//! Git-backed merge engine and workspace reclaimer.

pub mod command;
pub mod merge_engine;
pub mod worktree_reclaimer;

pub use command::{run_git, validate_branch_name, GitOutput};
pub use merge_engine::GitMergeEngine;
pub use worktree_reclaimer::GitWorkspaceReclaimer;
