//! GitHub webhook event types.
//!
//! Only the events that start builds are modelled:
//!
//! - `status` - a CI status on a commit; success on `stage` starts a stage build
//! - `push` - a push to `master` starts a master build, a pushed tag a tag build
//! - `ping` - sent when the hook is created; answered, never acted on

use serde::{Deserialize, Serialize};

use crate::types::{ComponentRef, Sha};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum GitHubEvent {
    Ping,
    Status(StatusEvent),
    Push(PushEvent),
}

impl GitHubEvent {
    /// The repository the event belongs to, if any.
    pub fn repository(&self) -> Option<&Repository> {
        match self {
            GitHubEvent::Ping => None,
            GitHubEvent::Status(e) => Some(&e.repository),
            GitHubEvent::Push(e) => Some(&e.repository),
        }
    }
}

/// The repository a delivery concerns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub component: ComponentRef,
    /// URL as reported by GitHub (SSH when available).
    pub clone_url: String,
}

/// Commit status state (legacy Status API).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusState {
    Pending,
    Success,
    Failure,
    Error,
}

/// A commit status update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub repository: Repository,
    pub sha: Sha,
    pub state: StatusState,
    /// Branches whose tip is the commit.
    pub branches: Vec<String>,
    /// Full message of the commit.
    pub commit_message: String,
}

/// The object a push updated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PushTarget {
    Branch(String),
    Tag(String),
}

impl PushTarget {
    /// Classifies a full ref name. Returns `None` for other ref namespaces.
    pub fn from_ref(git_ref: &str) -> Option<PushTarget> {
        if let Some(branch) = git_ref.strip_prefix("refs/heads/") {
            Some(PushTarget::Branch(branch.to_string()))
        } else {
            git_ref
                .strip_prefix("refs/tags/")
                .map(|tag| PushTarget::Tag(tag.to_string()))
        }
    }
}

/// A push of commits or a tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    pub repository: Repository,
    pub target: PushTarget,
    /// New tip. `None` when the ref was deleted.
    pub after: Option<Sha>,
    pub deleted: bool,
    pub head_commit_message: Option<String>,
}
