//! Push operations.
//!
//! Branches and tags are pushed with fully qualified refspecs
//! (`refs/heads/<b>:refs/heads/<b>`, `refs/tags/<t>:refs/tags/<t>`), several
//! refs in one `git push` when the pipeline updates more than one branch.

use tracing::{debug, warn};

use super::{GitError, GitResult, Repository};

/// Result of a push operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    /// Push succeeded.
    Success,

    /// Push was rejected (non-fast-forward, protected ref, existing tag).
    Rejected {
        /// Details about why the push was rejected.
        details: String,
    },

    /// Push was a no-op (remote already has these refs).
    AlreadyUpToDate,
}

impl PushResult {
    /// Returns true if the push succeeded or had nothing to do.
    pub fn is_ok(&self) -> bool {
        !self.is_rejected()
    }

    /// Returns true if the push was rejected.
    pub fn is_rejected(&self) -> bool {
        matches!(self, PushResult::Rejected { .. })
    }

    /// Converts a rejection into [`GitError::PushRejected`].
    pub fn into_result(self) -> GitResult<()> {
        match self {
            PushResult::Rejected { details } => Err(GitError::PushRejected { details }),
            _ => Ok(()),
        }
    }
}

pub fn branch_refspec(branch: &str) -> String {
    format!("refs/heads/{0}:refs/heads/{0}", branch)
}

pub fn tag_refspec(tag: &str) -> String {
    format!("refs/tags/{0}:refs/tags/{0}", tag)
}

/// Pushes `refspecs` to origin in one command.
pub async fn push_refspecs(repo: &Repository, refspecs: &[String]) -> GitResult<PushResult> {
    let mut cmd = repo.network_command();
    cmd.args(["push", "--porcelain", "origin"]);
    cmd.args(refspecs);
    let output = cmd.output().await?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    classify(output.status.success(), &stdout, &stderr, refspecs)
}

fn classify(
    success: bool,
    stdout: &str,
    stderr: &str,
    refspecs: &[String],
) -> GitResult<PushResult> {
    if success {
        // Porcelain marks up-to-date refs with '=' in the flag column.
        let updated = stdout
            .lines()
            .filter(|l| l.contains('\t'))
            .any(|l| !l.starts_with('='));
        if !updated
            || stdout.contains("Everything up-to-date")
            || stderr.contains("Everything up-to-date")
        {
            return Ok(PushResult::AlreadyUpToDate);
        }
        return Ok(PushResult::Success);
    }

    if stdout.contains("[rejected]")
        || stdout.contains("[remote rejected]")
        || stderr.contains("rejected")
        || stderr.contains("non-fast-forward")
    {
        warn!(refspecs = ?refspecs, "Push rejected");
        return Ok(PushResult::Rejected {
            details: format!("{}{}", stdout.trim(), stderr.trim()),
        });
    }

    Err(GitError::CommandFailed {
        command: format!("git push origin {}", refspecs.join(" ")),
        stderr: stderr.to_string(),
    })
}

/// Pushes local branches to the same-named remote branches.
pub async fn push_branches(repo: &Repository, branches: &[&str]) -> GitResult<PushResult> {
    let refspecs: Vec<String> = branches.iter().map(|b| branch_refspec(b)).collect();
    debug!(branches = ?branches, "Pushing branches");
    push_refspecs(repo, &refspecs).await
}

/// Pushes a local tag.
pub async fn push_tag(repo: &Repository, tag: &str) -> GitResult<PushResult> {
    debug!(tag, "Pushing tag");
    push_refspecs(repo, &[tag_refspec(tag)]).await
}
