//! Source control adapter.
//!
//! Every job works on its own clone inside a [`worktree::WorkingTree`]. This
//! module wraps the git CLI for the operations the build pipeline and the test
//! scheduler need:
//! - clone / checkout / commit against a single remote (`origin`)
//! - tag lookup and creation for release guards
//! - merges with a deterministic conflict policy ([`merge`])
//! - branch and tag pushes ([`push`])
//!
//! All commands run through [`git_command`], which isolates git from the
//! host's system and user configuration. Credentials are injected per command:
//! network operations on an authenticated [`Repository`] use `GIT_SSH_COMMAND`
//! with the configured key, read-only clones go over HTTPS without any.

pub mod merge;
pub mod push;
pub mod worktree;

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};

use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

use crate::types::{ComponentRef, Sha};

pub use merge::{ConflictPolicy, MergeResult};
pub use push::PushResult;
pub use worktree::{WorkingTree, cleanup_stale};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// A merge left conflicts the policy could not resolve.
    #[error("merge conflict: {details}")]
    MergeConflict { details: String },

    /// Push was rejected by the remote.
    #[error("push rejected: {details}")]
    PushRejected { details: String },

    /// Invalid SHA format.
    #[error("invalid SHA: {0}")]
    InvalidSha(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Identity used for creating commits and annotated tags.
///
/// Passed via `-c` flags so commits work with global/system config disabled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    pub name: String,
    pub email: String,
}

/// How a clone talks to its remote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Authenticated transport used for jobs that push.
    Authenticated,
    /// Anonymous transport for jobs that only read.
    ReadOnly,
}

/// Remote and credential settings shared by all jobs.
#[derive(Debug, Clone)]
pub struct GitConfig {
    /// Base for authenticated clone URLs, e.g. `git@github.com:`.
    pub push_base_url: String,

    /// Base for read-only clone URLs, e.g. `https://github.com/`.
    pub read_base_url: String,

    /// Private key for SSH transport. When unset, the ambient SSH agent is used.
    pub ssh_key_path: Option<PathBuf>,

    /// Identity for automated commits and tags.
    pub identity: CommitIdentity,
}

impl GitConfig {
    /// Clone URL for `component` over `transport`.
    pub fn clone_url(&self, component: &ComponentRef, transport: &Transport) -> String {
        let base = match transport {
            Transport::Authenticated => &self.push_base_url,
            Transport::ReadOnly => &self.read_base_url,
        };
        join_url(base, &format!("{}/{}.git", component.organization, component.name))
    }
}

fn join_url(base: &str, path: &str) -> String {
    if base.ends_with(':') || base.ends_with('/') {
        format!("{}{}", base, path)
    } else {
        format!("{}/{}", base, path)
    }
}

/// Create a git Command with clean environment (no system/user config).
pub(crate) fn git_command(workdir: &Path) -> Command {
    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.stdin(Stdio::null());

    cmd
}

/// Create a git Command with the commit identity passed via `-c` flags.
pub(crate) fn git_commit_command(workdir: &Path, identity: &CommitIdentity) -> Command {
    let mut cmd = git_command(workdir);
    cmd.arg("-c");
    cmd.arg(format!("user.name={}", identity.name));
    cmd.arg("-c");
    cmd.arg(format!("user.email={}", identity.email));
    cmd
}

fn ssh_command(key: &Path) -> String {
    format!(
        "ssh -i {} -o IdentitiesOnly=yes -o StrictHostKeyChecking=accept-new",
        key.display()
    )
}

/// Runs a prepared command, mapping a non-zero exit to [`GitError::CommandFailed`].
pub(crate) async fn run(mut cmd: Command, args: &[&str]) -> GitResult<Output> {
    let output = cmd.args(args).output().await?;

    if output.status.success() {
        Ok(output)
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let command = format!("git {}", args.join(" "));
        Err(GitError::CommandFailed { command, stderr })
    }
}

/// Run a git command in the given working directory.
pub async fn run_git(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    run(git_command(workdir), args).await
}

/// Run a git command and return trimmed stdout.
pub async fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git(workdir, args).await?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// One commit as listed by [`Repository::log_since`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitSummary {
    pub sha: String,
    pub subject: String,
    pub author: String,
}

/// A local clone of one component repository.
#[derive(Debug, Clone)]
pub struct Repository {
    path: PathBuf,
    identity: CommitIdentity,
    ssh_key: Option<PathBuf>,
}

impl Repository {
    /// Clones `url` into `dest`.
    ///
    /// `reference` may be a branch or a tag name. `depth` makes a shallow clone.
    /// The SSH key is only attached for authenticated transport.
    pub async fn clone(
        config: &GitConfig,
        url: &str,
        transport: Transport,
        reference: Option<&str>,
        depth: Option<u32>,
        dest: &Path,
    ) -> GitResult<Repository> {
        let ssh_key = match transport {
            Transport::Authenticated => config.ssh_key_path.clone(),
            Transport::ReadOnly => None,
        };
        let parent = dest.parent().unwrap_or_else(|| Path::new("."));
        let dest_str = dest.to_string_lossy();
        let depth_str = depth.map(|d| d.to_string());

        let mut args = vec!["clone", "--quiet"];
        if let Some(reference) = reference {
            args.extend(["--branch", reference]);
        }
        if let Some(ref depth) = depth_str {
            args.extend(["--depth", depth.as_str()]);
        }
        args.extend(["--", url, dest_str.as_ref()]);

        debug!(
            url,
            reference = reference.unwrap_or("HEAD"),
            dest = %dest.display(),
            "Cloning repository"
        );
        let mut cmd = git_command(parent);
        if let Some(ref key) = ssh_key {
            cmd.env("GIT_SSH_COMMAND", ssh_command(key));
        }
        run(cmd, &args).await?;

        Ok(Repository {
            path: dest.to_path_buf(),
            identity: config.identity.clone(),
            ssh_key,
        })
    }

    /// Opens an existing clone.
    pub fn open(path: impl Into<PathBuf>, config: &GitConfig) -> Repository {
        Repository {
            path: path.into(),
            identity: config.identity.clone(),
            ssh_key: config.ssh_key_path.clone(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn identity(&self) -> &CommitIdentity {
        &self.identity
    }

    /// Command for operations that talk to the remote.
    pub(crate) fn network_command(&self) -> Command {
        let mut cmd = git_command(&self.path);
        if let Some(ref key) = self.ssh_key {
            cmd.env("GIT_SSH_COMMAND", ssh_command(key));
        }
        cmd
    }

    pub(crate) fn commit_command(&self) -> Command {
        git_commit_command(&self.path, &self.identity)
    }

    pub async fn git(&self, args: &[&str]) -> GitResult<Output> {
        run_git(&self.path, args).await
    }

    pub async fn git_stdout(&self, args: &[&str]) -> GitResult<String> {
        run_git_stdout(&self.path, args).await
    }

    /// Checks out `branch`, creating a local tracking branch from origin if needed.
    pub async fn checkout(&self, branch: &str) -> GitResult<()> {
        self.git(&["checkout", "--quiet", branch]).await?;
        Ok(())
    }

    /// Fetches refs from origin.
    pub async fn fetch(&self, refspecs: &[&str]) -> GitResult<()> {
        let mut args = vec!["fetch", "--quiet", "origin"];
        args.extend(refspecs);
        run(self.network_command(), &args).await?;
        Ok(())
    }

    /// Name of the checked-out branch, or `HEAD` when detached.
    pub async fn current_branch(&self) -> GitResult<String> {
        self.git_stdout(&["rev-parse", "--abbrev-ref", "HEAD"]).await
    }

    /// Get the SHA of a revision.
    pub async fn rev_parse(&self, rev: &str) -> GitResult<Sha> {
        let sha_str = self.git_stdout(&["rev-parse", "--verify", rev]).await?;
        Sha::parse(&sha_str).map_err(|_| GitError::InvalidSha(sha_str))
    }

    pub async fn head(&self) -> GitResult<Sha> {
        self.rev_parse("HEAD").await
    }

    /// Full message of the HEAD commit.
    pub async fn head_message(&self) -> GitResult<String> {
        self.git_stdout(&["log", "-1", "--format=%B"]).await
    }

    /// Stages the given paths (relative to the repository root).
    pub async fn add(&self, paths: &[&str]) -> GitResult<()> {
        let mut args = vec!["add", "--"];
        args.extend(paths);
        self.git(&args).await?;
        Ok(())
    }

    /// Returns true if the index differs from HEAD.
    pub async fn has_staged_changes(&self) -> GitResult<bool> {
        let output = git_command(&self.path)
            .args(["diff", "--cached", "--quiet"])
            .output()
            .await?;
        match output.status.code() {
            Some(0) => Ok(false),
            Some(1) => Ok(true),
            _ => Err(GitError::CommandFailed {
                command: "git diff --cached --quiet".to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            }),
        }
    }

    /// Commits the index with `message` and returns the new HEAD.
    pub async fn commit(&self, message: &str) -> GitResult<Sha> {
        run(self.commit_command(), &["commit", "--quiet", "-m", message]).await?;
        self.head().await
    }

    /// Most recent tag reachable from HEAD, or `None` if there is none.
    pub async fn latest_tag(&self) -> GitResult<Option<String>> {
        match self.git_stdout(&["describe", "--tags", "--abbrev=0"]).await {
            Ok(tag) if !tag.is_empty() => Ok(Some(tag)),
            Ok(_) => Ok(None),
            Err(GitError::CommandFailed { stderr, .. })
                if stderr.contains("No names found")
                    || stderr.contains("No tags can describe")
                    || stderr.contains("cannot describe") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Non-merge commits after `since` (exclusive) up to HEAD, newest first.
    ///
    /// With `since = None` the whole history of HEAD is listed.
    pub async fn log_since(&self, since: Option<&str>) -> GitResult<Vec<CommitSummary>> {
        let range = since.map(|s| format!("{}..HEAD", s));
        let mut args = vec!["log", "--no-merges", "--format=%H%x1f%s%x1f%an%x1e"];
        if let Some(ref range) = range {
            args.push(range.as_str());
        }
        let out = self.git_stdout(&args).await?;
        Ok(parse_log(&out))
    }

    /// Returns true if `refs/tags/<tag>` exists locally.
    pub async fn local_tag_exists(&self, tag: &str) -> GitResult<bool> {
        let reference = format!("refs/tags/{}", tag);
        let output = git_command(&self.path)
            .args(["rev-parse", "--quiet", "--verify", &reference])
            .output()
            .await?;
        Ok(output.status.success())
    }

    /// Returns true if origin has `refs/tags/<tag>`.
    pub async fn remote_tag_exists(&self, tag: &str) -> GitResult<bool> {
        let reference = format!("refs/tags/{}", tag);
        let output = run(
            self.network_command(),
            &["ls-remote", "--tags", "origin", &reference],
        )
        .await?;
        Ok(!String::from_utf8_lossy(&output.stdout).trim().is_empty())
    }

    /// Creates an annotated tag at `target`.
    pub async fn create_annotated_tag(
        &self,
        tag: &str,
        target: &str,
        message: &str,
    ) -> GitResult<()> {
        run(self.commit_command(), &["tag", "-a", tag, "-m", message, target]).await?;
        Ok(())
    }
}

fn parse_log(out: &str) -> Vec<CommitSummary> {
    out.split('\x1e')
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .filter_map(|record| {
            let mut fields = record.split('\x1f');
            Some(CommitSummary {
                sha: fields.next()?.to_string(),
                subject: fields.next()?.to_string(),
                author: fields.next().unwrap_or_default().to_string(),
            })
        })
        .collect()
}
