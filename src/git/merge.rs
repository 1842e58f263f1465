//! Merges with a deterministic conflict policy.
//!
//! The build pipeline never stops for manual conflict resolution. A merge is
//! first attempted with `-X theirs` or `-X ours`, which settles conflicting
//! hunks. Whatever is still unmerged after that (modify/delete, add/add of
//! binaries) is resolved file by file by taking the favored side's version, or
//! deleting the file when the favored side deleted it. Conflict markers never
//! reach a commit.

use tracing::{debug, info, warn};

use crate::types::Sha;

use super::{GitError, GitResult, Repository, run};

/// Which side wins a conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictPolicy {
    /// The branch being merged in wins.
    Theirs,
    /// The checked-out branch wins.
    Ours,
}

impl ConflictPolicy {
    fn strategy_option(self) -> &'static str {
        match self {
            ConflictPolicy::Theirs => "theirs",
            ConflictPolicy::Ours => "ours",
        }
    }

    fn checkout_flag(self) -> &'static str {
        match self {
            ConflictPolicy::Theirs => "--theirs",
            ConflictPolicy::Ours => "--ours",
        }
    }
}

/// Result of a merge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Merge completed, producing a new commit.
    Success {
        commit_sha: Sha,
    },

    /// Merge completed after resolving the listed files by policy.
    Resolved {
        commit_sha: Sha,
        resolved_files: Vec<String>,
    },

    /// Merge was a no-op (already up-to-date).
    AlreadyUpToDate,
}

impl MergeResult {
    /// Returns true if the merge created a commit.
    pub fn created_commit(&self) -> bool {
        matches!(
            self,
            MergeResult::Success { .. } | MergeResult::Resolved { .. }
        )
    }
}

/// Merges `source` into the checked-out branch.
///
/// `source` is any revision (`origin/stage`, a local branch, a SHA). Always
/// creates a merge commit unless the branch already contains `source`.
pub async fn merge(
    repo: &Repository,
    source: &str,
    policy: ConflictPolicy,
    message: &str,
) -> GitResult<MergeResult> {
    let args = [
        "merge",
        "--no-ff",
        "--no-edit",
        "-X",
        policy.strategy_option(),
        "-m",
        message,
        source,
    ];
    let output = repo.commit_command().args(args).output().await?;
    let stdout = String::from_utf8_lossy(&output.stdout);

    if output.status.success() {
        if stdout.contains("Already up to date") || stdout.contains("Already up-to-date") {
            debug!(source, "Merge already up to date");
            return Ok(MergeResult::AlreadyUpToDate);
        }
        let commit_sha = repo.head().await?;
        debug!(source, sha = %commit_sha, "Merged");
        return Ok(MergeResult::Success { commit_sha });
    }

    let unmerged = unmerged_files(repo).await?;
    if unmerged.is_empty() {
        // Not a conflict (unknown revision, dirty tree). Leave no merge state behind.
        let _ = abort_merge(repo).await;
        return Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        });
    }

    info!(
        source,
        files = unmerged.len(),
        policy = ?policy,
        "Resolving merge conflicts by policy"
    );
    if let Err(e) = resolve(repo, &unmerged, policy).await {
        warn!(source, error = %e, "Conflict resolution failed, aborting merge");
        let _ = abort_merge(repo).await;
        return Err(GitError::MergeConflict {
            details: format!("{}: {}", unmerged.join(", "), e),
        });
    }

    run(repo.commit_command(), &["commit", "--quiet", "--no-edit"]).await?;
    let commit_sha = repo.head().await?;
    Ok(MergeResult::Resolved {
        commit_sha,
        resolved_files: unmerged,
    })
}

async fn resolve(repo: &Repository, files: &[String], policy: ConflictPolicy) -> GitResult<()> {
    for file in files {
        let checkout = repo
            .git(&["checkout", policy.checkout_flag(), "--", file])
            .await;
        match checkout {
            Ok(_) => {
                repo.git(&["add", "--", file]).await?;
            }
            // The favored side deleted the file.
            Err(GitError::CommandFailed { .. }) => {
                repo.git(&["rm", "--quiet", "--force", "--", file]).await?;
            }
            Err(e) => return Err(e),
        }
    }

    let remaining = unmerged_files(repo).await?;
    if remaining.is_empty() {
        Ok(())
    } else {
        Err(GitError::MergeConflict {
            details: remaining.join(", "),
        })
    }
}

/// Paths with unresolved conflicts in the index.
pub async fn unmerged_files(repo: &Repository) -> GitResult<Vec<String>> {
    let out = repo
        .git_stdout(&["diff", "--name-only", "--diff-filter=U"])
        .await?;
    Ok(out
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(String::from)
        .collect())
}

/// Abandons an in-progress merge.
pub async fn abort_merge(repo: &Repository) -> GitResult<()> {
    repo.git(&["merge", "--abort"]).await?;
    Ok(())
}
