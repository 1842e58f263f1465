//! Build job records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ComponentRef, JobId};
use super::status::{JobStatus, TransitionError};

/// The three release actions a build can perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildKind {
    /// Changelog/version commit on `stage`, then merge `stage` into `master`.
    Stage,
    /// Tag the released version on `master`.
    Master,
    /// Publish catalog metadata, dependency graph and the package for a tag.
    Tag,
}

impl fmt::Display for BuildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BuildKind::Stage => "stage",
            BuildKind::Master => "master",
            BuildKind::Tag => "tag",
        };
        f.write_str(s)
    }
}

/// One GitHub-triggered release action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildJob {
    pub id: JobId,
    pub kind: BuildKind,
    /// Repository / unscoped package name.
    pub component: String,
    pub organization: String,
    pub branch: String,
    pub commit_sha: Option<String>,
    pub remote_url: String,
    pub bump_version: bool,
    /// Release version for tag builds (the tag ref without `refs/tags/`).
    #[serde(default)]
    pub release_version: Option<String>,
    pub status: JobStatus,
    pub error: bool,
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl BuildJob {
    /// Creates a new queued build.
    pub fn new(
        kind: BuildKind,
        component: impl Into<String>,
        organization: impl Into<String>,
        branch: impl Into<String>,
        remote_url: impl Into<String>,
    ) -> Self {
        BuildJob {
            id: JobId::generate(),
            kind,
            component: component.into(),
            organization: organization.into(),
            branch: branch.into(),
            commit_sha: None,
            remote_url: remote_url.into(),
            bump_version: false,
            release_version: None,
            status: JobStatus::Queued,
            error: false,
            message: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn with_commit(mut self, sha: impl Into<String>) -> Self {
        self.commit_sha = Some(sha.into());
        self
    }

    pub fn with_bump_version(mut self, bump: bool) -> Self {
        self.bump_version = bump;
        self
    }

    pub fn with_release_version(mut self, version: impl Into<String>) -> Self {
        self.release_version = Some(version.into());
        self
    }

    /// The component this build targets.
    pub fn component_ref(&self) -> ComponentRef {
        ComponentRef::new(&self.organization, &self.component)
    }

    /// Marks the build as running.
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Marks the build as finished, recording the outcome.
    pub fn finish(&mut self, error: bool, message: impl Into<String>) -> Result<(), TransitionError> {
        self.status = self.status.transition(JobStatus::Finished)?;
        self.error = error;
        self.message = Some(message.into());
        self.ended_at = Some(Utc::now());
        Ok(())
    }
}
