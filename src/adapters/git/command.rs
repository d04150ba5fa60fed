//! Thin wrapper over `git` subprocesses.

use std::path::Path;
use std::process::Stdio;

use tokio::process::Command;

/// Captured result of one git invocation.
#[derive(Debug, Clone)]
pub struct GitOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl GitOutput {
    /// Trimmed stdout when the command succeeded.
    pub fn ok_stdout(&self) -> Option<String> {
        self.success.then(|| self.stdout.trim().to_string())
    }

    /// Best description of a failure: stderr, else stdout.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            self.stdout.trim().to_string()
        } else {
            stderr.to_string()
        }
    }
}

/// Run `git <args>` in `dir`. Spawn failures are returned as `Err`.
pub async fn run_git(dir: &Path, args: &[&str]) -> std::io::Result<GitOutput> {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;

    Ok(GitOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Run a shell command line in `dir`.
pub async fn run_shell(dir: &Path, command_line: &str) -> std::io::Result<GitOutput> {
    #[cfg(unix)]
    let mut command = {
        let mut c = Command::new("sh");
        c.args(["-c", command_line]);
        c
    };
    #[cfg(not(unix))]
    let mut command = {
        let mut c = Command::new("cmd");
        c.args(["/C", command_line]);
        c
    };

    let output = command
        .current_dir(dir)
        .stdin(Stdio::null())
        .output()
        .await?;

    Ok(GitOutput {
        success: output.status.success(),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}

/// Reject names git would refuse or that could be read as options.
pub fn validate_branch_name(name: &str) -> Result<(), String> {
    if name.is_empty() {
        return Err("branch name cannot be empty".to_string());
    }
    if name.starts_with('-') {
        return Err(format!("invalid branch name '{name}': must not start with '-'"));
    }
    if name.contains("..") {
        return Err(format!("invalid branch name '{name}': must not contain '..'"));
    }
    if let Some(ch) = name
        .chars()
        .find(|ch| ch.is_ascii_control() || matches!(ch, ' ' | '~' | '^' | ':' | '?' | '*' | '[' | '\\'))
    {
        return Err(format!(
            "invalid branch name '{name}': contains disallowed character {ch:?}"
        ));
    }
    if name.ends_with(".lock") || name.ends_with('/') {
        return Err(format!("invalid branch name '{name}': bad suffix"));
    }
    Ok(())
}
