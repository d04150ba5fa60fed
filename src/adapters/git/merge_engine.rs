//! Reference merge engine backed by `git` subprocesses.
//!
//! Merges each source branch into its target with `--no-ff` in a single
//! working checkout, optionally runs a test command, then pushes. Any failure
//! after the merge commit resets the target to its pre-merge head.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::command::{run_git, run_shell, validate_branch_name, GitOutput};
use crate::domain::models::{EngineConfig, FailureKind, MergeRequest};
use crate::domain::ports::{MergeEngine, MergeFailure, MergeOutcome};

/// Longest test output tail carried in a failure message.
const MAX_TEST_OUTPUT: usize = 2000;

pub struct GitMergeEngine {
    repo_path: PathBuf,
    config: EngineConfig,
}

impl GitMergeEngine {
    pub fn new(repo_path: impl Into<PathBuf>, config: EngineConfig) -> Self {
        Self {
            repo_path: repo_path.into(),
            config,
        }
    }

    async fn git(&self, args: &[&str]) -> Result<GitOutput, MergeFailure> {
        run_git(&self.repo_path, args).await.map_err(|e| {
            MergeFailure::new(FailureKind::Other, format!("failed to run git {}: {e}", args.join(" ")))
        })
    }

    /// Local ref for the source branch, falling back to the remote-tracking ref.
    async fn resolve_source(&self, branch: &str) -> Result<String, MergeFailure> {
        let remote_ref = format!("{}/{branch}", self.config.remote);
        for candidate in [branch, remote_ref.as_str()] {
            let out = self.git(&["rev-parse", "--verify", "--quiet", candidate]).await?;
            if out.success {
                return Ok(candidate.to_string());
            }
        }
        Err(MergeFailure::new(
            FailureKind::BranchNotFound,
            format!("branch '{branch}' not found locally or on {}", self.config.remote),
        ))
    }

    async fn head(&self) -> Result<String, MergeFailure> {
        let out = self.git(&["rev-parse", "HEAD"]).await?;
        out.ok_stdout().ok_or_else(|| {
            MergeFailure::new(FailureKind::Other, format!("rev-parse HEAD failed: {}", out.error_text()))
        })
    }

    async fn reset_to(&self, sha: &str) {
        match self.git(&["reset", "--hard", sha]).await {
            Ok(out) if out.success => debug!(sha, "target reset to pre-merge head"),
            Ok(out) => warn!(sha, error = %out.error_text(), "failed to reset target"),
            Err(failure) => warn!(sha, error = %failure.error, "failed to reset target"),
        }
    }

    async fn conflicted_files(&self) -> Vec<String> {
        match self.git(&["diff", "--name-only", "--diff-filter=U"]).await {
            Ok(out) => out
                .stdout
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => Vec::new(),
        }
    }

    async fn try_merge(&self, request: &MergeRequest) -> Result<String, MergeFailure> {
        for name in [&request.branch, &request.target_branch] {
            validate_branch_name(name)
                .map_err(|e| MergeFailure::new(FailureKind::Other, e).with_recoverable(false))?;
        }

        if self.config.fetch {
            let out = self.git(&["fetch", &self.config.remote]).await?;
            if !out.success {
                warn!(remote = %self.config.remote, error = %out.error_text(), "fetch failed, using local refs");
            }
        }

        let source = self.resolve_source(&request.branch).await?;

        let checkout = self.git(&["checkout", &request.target_branch]).await?;
        if !checkout.success {
            return Err(MergeFailure::new(
                FailureKind::Other,
                format!("checkout of {} failed: {}", request.target_branch, checkout.error_text()),
            ));
        }
        let pre_merge = self.head().await?;

        let message = format!("Merge {} into {}", request.branch, request.target_branch);
        let merge = self.git(&["merge", "--no-ff", "-m", &message, "--", &source]).await?;
        if !merge.success {
            let files = self.conflicted_files().await;
            let _ = self.git(&["merge", "--abort"]).await;
            if files.is_empty() {
                return Err(MergeFailure::new(
                    FailureKind::Other,
                    format!("merge failed: {}", merge.error_text()),
                ));
            }
            return Err(MergeFailure::conflict(files));
        }

        if let Some(test_command) = self.config.test_command.as_deref().filter(|c| !c.trim().is_empty()) {
            let tests = run_shell(&self.repo_path, test_command).await.map_err(|e| {
                MergeFailure::new(FailureKind::Tests, format!("failed to run tests: {e}"))
            });
            match tests {
                Ok(out) if out.success => debug!("tests passed"),
                Ok(out) => {
                    self.reset_to(&pre_merge).await;
                    return Err(MergeFailure::new(FailureKind::Tests, tail(&out.error_text())));
                }
                Err(failure) => {
                    self.reset_to(&pre_merge).await;
                    return Err(failure);
                }
            }
        }

        let merge_commit = self.head().await?;

        if self.config.push {
            let push = self.git(&["push", &self.config.remote, &request.target_branch]).await?;
            if !push.success {
                self.reset_to(&pre_merge).await;
                return Err(MergeFailure::new(
                    FailureKind::Push,
                    format!("push to {} failed: {}", self.config.remote, push.error_text()),
                ));
            }
        }

        Ok(merge_commit)
    }
}

#[async_trait]
impl MergeEngine for GitMergeEngine {
    #[instrument(skip(self, request), fields(mr_id = %request.id, branch = %request.branch, target_branch = %request.target_branch))]
    async fn merge(&self, request: &MergeRequest) -> MergeOutcome {
        match self.try_merge(request).await {
            Ok(merge_commit) => {
                info!(commit = %merge_commit, "branch merged");
                MergeOutcome::Merged { merge_commit }
            }
            Err(failure) => MergeOutcome::Failed(failure),
        }
    }
}

fn tail(text: &str) -> String {
    if text.len() <= MAX_TEST_OUTPUT {
        return text.to_string();
    }
    let mut start = text.len() - MAX_TEST_OUTPUT;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    format!("...{}", &text[start..])
}
