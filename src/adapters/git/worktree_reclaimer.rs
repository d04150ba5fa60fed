//! Reclaims a finished worker's git worktree.
//!
//! A worktree is only removed when it carries nothing that would be lost:
//! no uncommitted changes, no stashes and no commits missing from every
//! remote. Anything else leaves it in place and reports why.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument};

use super::command::run_git;
use crate::domain::models::RigConfig;
use crate::domain::ports::{ReclamationResult, WorkspaceReclaimer};

pub struct GitWorkspaceReclaimer {
    repo_path: PathBuf,
    worktree_dir: PathBuf,
    branch_prefix: String,
}

impl GitWorkspaceReclaimer {
    pub fn new(
        repo_path: impl Into<PathBuf>,
        worktree_dir: impl Into<PathBuf>,
        branch_prefix: impl Into<String>,
    ) -> Self {
        Self {
            repo_path: repo_path.into(),
            worktree_dir: worktree_dir.into(),
            branch_prefix: branch_prefix.into(),
        }
    }

    pub fn from_rig(rig: &RigConfig) -> Self {
        Self::new(&rig.repo_path, &rig.worktree_dir, &rig.worker_branch_prefix)
    }

    /// Checkout location for a worker.
    pub fn worktree_path(&self, worker: &str) -> PathBuf {
        self.repo_path.join(&self.worktree_dir).join(worker)
    }

    /// Reason the worktree must be kept, if any.
    async fn keep_reason(&self, path: &Path) -> Result<Option<&'static str>, String> {
        let checks: [(&[&str], &'static str); 3] = [
            (&["status", "--porcelain"], "has uncommitted changes"),
            (&["stash", "list"], "has stashed changes"),
            (&["log", "--oneline", "HEAD", "--not", "--remotes"], "has unpushed commits"),
        ];

        for (args, reason) in checks {
            let out = run_git(path, args)
                .await
                .map_err(|e| format!("git {} failed: {e}", args.join(" ")))?;
            if !out.success {
                return Err(format!("git {} failed: {}", args.join(" "), out.error_text()));
            }
            if !out.stdout.trim().is_empty() {
                return Ok(Some(reason));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl WorkspaceReclaimer for GitWorkspaceReclaimer {
    #[instrument(skip(self))]
    async fn reclaim(&self, worker: &str) -> ReclamationResult {
        let path = self.worktree_path(worker);
        if !path.exists() {
            return ReclamationResult::Skipped {
                reason: format!("no worktree at {}", path.display()),
            };
        }

        match self.keep_reason(&path).await {
            Ok(Some(reason)) => {
                return ReclamationResult::Skipped {
                    reason: reason.to_string(),
                }
            }
            Ok(None) => {}
            Err(error) => return ReclamationResult::Failed { error },
        }

        let path_arg = path.to_string_lossy();
        match run_git(&self.repo_path, &["worktree", "remove", &path_arg]).await {
            Ok(out) if out.success => {}
            Ok(out) => {
                return ReclamationResult::Failed {
                    error: format!("worktree remove failed: {}", out.error_text()),
                }
            }
            Err(e) => {
                return ReclamationResult::Failed {
                    error: format!("worktree remove failed: {e}"),
                }
            }
        }

        let branch = format!("{}{worker}", self.branch_prefix);
        match run_git(&self.repo_path, &["branch", "-D", &branch]).await {
            Ok(out) if out.success => debug!(%branch, "worker branch deleted"),
            Ok(out) => debug!(%branch, error = %out.error_text(), "worker branch left in place"),
            Err(e) => debug!(%branch, error = %e, "worker branch left in place"),
        }

        info!(path = %path.display(), "worktree reclaimed");
        ReclamationResult::Reclaimed {
            reason: format!("removed {}", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command as StdCommand;

    fn git(dir: &Path, args: &[&str]) {
        let out = StdCommand::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    }

    /// Repo with a pushed `main` and a worktree for `nux` at `polecats/nux`.
    fn setup() -> (tempfile::TempDir, PathBuf) {
        let root = tempfile::tempdir().unwrap();
        let bare = root.path().join("origin.git");
        let repo = root.path().join("repo");
        std::fs::create_dir_all(&bare).unwrap();
        std::fs::create_dir_all(&repo).unwrap();

        git(&bare, &["init", "-q", "--bare"]);
        git(&repo, &["init", "-q", "-b", "main"]);
        git(&repo, &["config", "user.email", "refinery@example.com"]);
        git(&repo, &["config", "user.name", "Refinery"]);
        std::fs::write(repo.join("a.txt"), "base\n").unwrap();
        git(&repo, &["add", "."]);
        git(&repo, &["commit", "-q", "-m", "base"]);
        git(&repo, &["remote", "add", "origin", &bare.to_string_lossy()]);
        git(&repo, &["push", "-q", "origin", "main"]);
        git(&repo, &["worktree", "add", "-q", "-b", "polecat/nux", "polecats/nux"]);

        (root, repo)
    }

    #[tokio::test]
    async fn test_missing_worktree_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let reclaimer = GitWorkspaceReclaimer::new(dir.path(), "polecats", "polecat/");
        let result = reclaimer.reclaim("ghost").await;
        assert!(matches!(result, ReclamationResult::Skipped { .. }), "{result:?}");
    }

    #[tokio::test]
    async fn test_clean_worktree_is_removed() {
        let (_root, repo) = setup();
        let reclaimer = GitWorkspaceReclaimer::new(&repo, "polecats", "polecat/");

        let result = reclaimer.reclaim("nux").await;
        assert!(matches!(result, ReclamationResult::Reclaimed { .. }), "{result:?}");
        assert!(!repo.join("polecats/nux").exists());
    }

    #[tokio::test]
    async fn test_dirty_worktree_is_kept() {
        let (_root, repo) = setup();
        std::fs::write(repo.join("polecats/nux/wip.txt"), "wip\n").unwrap();
        let reclaimer = GitWorkspaceReclaimer::new(&repo, "polecats", "polecat/");

        let result = reclaimer.reclaim("nux").await;
        assert_eq!(
            result,
            ReclamationResult::Skipped {
                reason: "has uncommitted changes".to_string()
            }
        );
        assert!(repo.join("polecats/nux").exists());
    }

    #[tokio::test]
    async fn test_unpushed_commits_are_kept() {
        let (_root, repo) = setup();
        let worktree = repo.join("polecats/nux");
        std::fs::write(worktree.join("b.txt"), "feature\n").unwrap();
        git(&worktree, &["add", "."]);
        git(&worktree, &["commit", "-q", "-m", "feature"]);
        let reclaimer = GitWorkspaceReclaimer::new(&repo, "polecats", "polecat/");

        let result = reclaimer.reclaim("nux").await;
        assert_eq!(
            result,
            ReclamationResult::Skipped {
                reason: "has unpushed commits".to_string()
            }
        );
    }
}
