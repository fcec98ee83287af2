//! Version-control collaborator.
//!
//! Everything here is best effort: callers log failures and carry on.
//! `GitVcs` shells out to `git -C <root>`; `NullVcs` stands in when the
//! project is not a repository or VCS is disabled in `wai.toml`.

use crate::core::error::WaiError;
use crate::core::events::{EventLog, WaiEvent};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

pub trait VersionControl {
    fn is_available(&self) -> bool;
    fn stage(&self, rel_path: &str) -> Result<(), WaiError>;
    fn stage_all(&self) -> Result<(), WaiError>;
    /// `true` when the commit was created.
    fn commit(&self, message: &str) -> bool;
    fn push(&self) -> bool;
    /// Any worktree or index change (`status --porcelain` non-empty).
    fn has_pending_changes(&self) -> Result<bool, WaiError>;
    /// Index differs from HEAD.
    fn has_staged_changes(&self) -> Result<bool, WaiError>;
}

#[derive(Debug, Clone, Default)]
pub struct NullVcs;

impl VersionControl for NullVcs {
    fn is_available(&self) -> bool {
        false
    }

    fn stage(&self, _rel_path: &str) -> Result<(), WaiError> {
        Ok(())
    }

    fn stage_all(&self) -> Result<(), WaiError> {
        Ok(())
    }

    fn commit(&self, _message: &str) -> bool {
        false
    }

    fn push(&self) -> bool {
        false
    }

    fn has_pending_changes(&self) -> Result<bool, WaiError> {
        Ok(false)
    }

    fn has_staged_changes(&self) -> Result<bool, WaiError> {
        Ok(false)
    }
}

#[derive(Debug, Clone)]
pub struct GitVcs {
    repo_root: PathBuf,
    available: bool,
}

impl GitVcs {
    /// Runs `git rev-parse --is-inside-work-tree` once.
    pub fn detect(repo_root: &Path) -> Self {
        let available = Command::new("git")
            .arg("-C")
            .arg(repo_root)
            .args(["rev-parse", "--is-inside-work-tree"])
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false);
        Self {
            repo_root: repo_root.to_path_buf(),
            available,
        }
    }

    fn run_git(&self, args: &[&str]) -> Result<Output, WaiError> {
        let output = Command::new("git")
            .arg("-C")
            .arg(&self.repo_root)
            .args(args)
            .output()
            .map_err(|e| WaiError::CollaboratorFailure(format!("git {}: {}", args.join(" "), e)))?;
        tracing::debug!(
            args = %args.join(" "),
            code = ?output.status.code(),
            "git"
        );
        Ok(output)
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output, WaiError> {
        let output = self.run_git(args)?;
        if !output.status.success() {
            return Err(WaiError::CollaboratorFailure(format!(
                "git {} failed: {}",
                args.join(" "),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output)
    }

    fn run_ok(&self, args: &[&str]) -> bool {
        match self.run_checked(args) {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!(error = %e, "git step failed");
                false
            }
        }
    }
}

impl VersionControl for GitVcs {
    fn is_available(&self) -> bool {
        self.available
    }

    fn stage(&self, rel_path: &str) -> Result<(), WaiError> {
        self.run_checked(&["add", "--", rel_path]).map(|_| ())
    }

    fn stage_all(&self) -> Result<(), WaiError> {
        self.run_checked(&["add", "-A"]).map(|_| ())
    }

    fn commit(&self, message: &str) -> bool {
        self.run_ok(&["commit", "-m", message])
    }

    fn push(&self) -> bool {
        self.run_ok(&["push"])
    }

    fn has_pending_changes(&self) -> Result<bool, WaiError> {
        let out = self.run_checked(&["status", "--porcelain"])?;
        Ok(!String::from_utf8_lossy(&out.stdout).trim().is_empty())
    }

    fn has_staged_changes(&self) -> Result<bool, WaiError> {
        // `diff --cached --quiet`: 0 = clean, 1 = differences, else error.
        let out = self.run_git(&["diff", "--cached", "--quiet"])?;
        match out.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(WaiError::CollaboratorFailure(format!(
                "git diff --cached failed: {}",
                String::from_utf8_lossy(&out.stderr).trim()
            ))),
        }
    }
}

/// Picks git when enabled and the root is a work tree, else the null collaborator.
pub fn detect(repo_root: &Path, enabled: bool) -> Box<dyn VersionControl> {
    if !enabled {
        return Box::new(NullVcs);
    }
    let git = GitVcs::detect(repo_root);
    if git.is_available() {
        Box::new(git)
    } else {
        Box::new(NullVcs)
    }
}

/// What the commit step did after a batch of writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// No repository, or VCS disabled.
    Unavailable,
    /// Index matched HEAD; nothing was committed.
    Clean,
    /// Commit and push were each attempted; either may have failed.
    Attempted {
        message: String,
        committed: bool,
        /// `None` when push is turned off.
        pushed: Option<bool>,
    },
    /// A step before the commit (status check, staging) failed.
    Failed(String),
}

/// Commits whatever is staged, then pushes when `push` is set.
///
/// An indeterminate staged-changes check is treated as "there are changes"
/// and the commit is attempted anyway. The push does not depend on the
/// commit succeeding: an earlier unpushed commit may still be waiting.
pub fn commit_staged(
    vcs: &dyn VersionControl,
    message: &str,
    push: bool,
    events: &EventLog,
    prompt_id: Option<u64>,
) -> CommitOutcome {
    if !vcs.is_available() {
        return CommitOutcome::Unavailable;
    }
    let tag = |e: WaiEvent| match prompt_id {
        Some(id) => e.prompt(id),
        None => e,
    };
    match vcs.has_staged_changes() {
        Ok(false) => {
            tracing::info!("no staged changes, skipping commit");
            return CommitOutcome::Clean;
        }
        Ok(true) => {}
        Err(e) => tracing::warn!(error = %e, "staged-changes check failed, committing anyway"),
    }

    let committed = vcs.commit(message);
    if !committed {
        tracing::warn!(message, "commit failed");
    }
    events.record(tag(WaiEvent::new(
        "vcs.commit",
        if committed { "success" } else { "error" },
    )
    .message(message)));

    let pushed = if push {
        let ok = vcs.push();
        if !ok {
            tracing::warn!("push failed");
        }
        events.record(tag(WaiEvent::new(
            "vcs.push",
            if ok { "success" } else { "error" },
        )));
        Some(ok)
    } else {
        None
    };
    CommitOutcome::Attempted {
        message: message.to_string(),
        committed,
        pushed,
    }
}
