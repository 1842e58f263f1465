//! Build pipeline.
//!
//! A [`BuildJob`] is one of three release actions, dispatched by
//! [`run_pipeline`]:
//!
//! ```text
//!  stage  : clone stage ─► bump? ─► changelog ─► commit [ci skip] ─► merge stage→master
//!                          ─► back-merge master→stage (best effort) ─► push both
//!  master : clone master ─► read version ─► duplicate tag guard ─► annotated tag ─► push tag
//!  tag    : clone tag (read-only) ─► catalog entry ─► dependency record ─► publish?
//! ```
//!
//! Every step runs in a fresh [`WorkingTree`] released on every exit path.
//! The cancellation token is checked before each network or subprocess step;
//! a cancelled build stops writing to the store.

pub mod catalog;
pub mod changelog;
pub mod manifest;
pub mod master;
pub mod stage;
pub mod tag;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{ExecutorError, PackageManager};
use crate::git::{GitConfig, GitError, WorkingTree};
use crate::store::{EntityStore, StoreError, records};
use crate::types::{BuildJob, BuildKind, ExclusionList, JobId, JobStatus};
use crate::worker::JobRunner;

pub use manifest::{ManifestError, Version};

/// Branch that receives day-to-day development.
pub const STAGE_BRANCH: &str = "stage";

/// Release branch.
pub const MASTER_BRANCH: &str = "master";

/// Terminal message of builds skipped by the exclusion list.
pub const EXCLUDED_MESSAGE: &str = "Component is excluded from builds";

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Git(#[from] GitError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The version being released already has a tag.
    #[error("tag {tag} already exists")]
    TagExists { tag: String },

    #[error("tag build has no release version")]
    MissingRelease,
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Static settings shared by every build.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Parent directory of the per-job working trees.
    pub work_root: PathBuf,
    pub git: GitConfig,
    pub excluded: ExclusionList,
    /// Organizations whose packages are published by tag builds.
    pub publish_scopes: Vec<String>,
}

impl PipelineConfig {
    pub fn publishes(&self, organization: &str) -> bool {
        self.publish_scopes.iter().any(|s| s == organization)
    }
}

/// What a build step has access to.
pub struct BuildContext<'a, S, P> {
    pub store: &'a S,
    pub packages: &'a P,
    pub config: &'a PipelineConfig,
    pub cancel: &'a CancellationToken,
}

impl<S, P> BuildContext<'_, S, P> {
    /// Fails with [`PipelineError::Cancelled`] once the build was removed.
    pub fn ensure_active(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }
}

/// Runs `job` to completion and returns its success message.
///
/// Excluded components succeed without side effects.
#[instrument(skip_all, fields(job = %job.id, kind = %job.kind, component = %job.component))]
pub async fn run_pipeline<S, P>(ctx: &BuildContext<'_, S, P>, job: &BuildJob) -> Result<String>
where
    S: EntityStore,
    P: PackageManager,
{
    if ctx.config.excluded.contains(&job.component_ref()) {
        info!("Component is excluded, skipping build");
        return Ok(EXCLUDED_MESSAGE.to_string());
    }
    ctx.ensure_active()?;

    let tree = WorkingTree::create(&ctx.config.work_root, &job.id)?;
    let result = match job.kind {
        BuildKind::Stage => stage::run(ctx, job, &tree).await,
        BuildKind::Master => master::run(ctx, job, &tree).await,
        BuildKind::Tag => tag::run(ctx, job, &tree).await,
    };
    tree.release().await;
    result
}

/// Runs build jobs for the builds queue.
pub struct BuildRunner<S, P> {
    store: Arc<S>,
    packages: Arc<P>,
    config: PipelineConfig,
}

impl<S: EntityStore, P: PackageManager> BuildRunner<S, P> {
    pub fn new(store: Arc<S>, packages: Arc<P>, config: PipelineConfig) -> Self {
        BuildRunner {
            store,
            packages,
            config,
        }
    }

    async fn execute(&self, id: &JobId, cancel: &CancellationToken) -> Result<()> {
        let store = self.store.as_ref();
        let Some(job) = records::get_build(store, id).await? else {
            warn!(job = %id, "Build record not found");
            return Ok(());
        };
        if job.status != JobStatus::Queued {
            debug!(job = %id, status = %job.status, "Build already handled, skipping");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let job = records::update_build(store, id, |j| j.start()).await?;
        let ctx = BuildContext {
            store,
            packages: self.packages.as_ref(),
            config: &self.config,
            cancel,
        };
        let outcome = run_pipeline(&ctx, &job).await;

        if cancel.is_cancelled() {
            info!(job = %id, "Build cancelled, record left as is");
            return Ok(());
        }
        let (error, message) = match outcome {
            Ok(message) => {
                info!(job = %id, message = %message, "Build finished");
                (false, message)
            }
            Err(e) => {
                error!(job = %id, error = %e, "Build failed");
                (true, e.to_string())
            }
        };
        records::update_build(store, id, move |j| j.finish(error, message)).await?;
        Ok(())
    }
}

impl<S: EntityStore, P: PackageManager> JobRunner for BuildRunner<S, P> {
    async fn run(&self, id: JobId, cancel: CancellationToken) {
        if let Err(e) = self.execute(&id, &cancel).await {
            error!(job = %id, error = %e, "Failed to record build outcome");
        }
    }
}
