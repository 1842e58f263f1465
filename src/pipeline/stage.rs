//! Stage build: release commit on `stage`, then promote it to `master`.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::executor::PackageManager;
use crate::git::merge::{ConflictPolicy, merge};
use crate::git::push::push_branches;
use crate::git::{Repository, Transport, WorkingTree};
use crate::store::EntityStore;
use crate::types::BuildJob;

use super::changelog::{CHANGELOG, update_changelog};
use super::manifest::{LOCK_FILE, MANIFEST, Version, bump_patch_version, read_version};
use super::{BuildContext, MASTER_BRANCH, Result, STAGE_BRANCH};

/// Message of the automated changelog/version commit on `stage`.
pub const STAGE_COMMIT_MESSAGE: &str = "[ci skip] Automated commit after stage build.";

const PROMOTE_MESSAGE: &str = "Merge branch 'stage' into master";

// Skipped by CI so the back-merge does not trigger another stage build.
const BACK_MERGE_MESSAGE: &str = "[ci skip] Merge branch 'master' into stage";

pub async fn run<S, P>(
    ctx: &BuildContext<'_, S, P>,
    job: &BuildJob,
    tree: &WorkingTree,
) -> Result<String>
where
    S: EntityStore,
    P: PackageManager,
{
    let (repo, version) = commit_release(ctx, job, tree).await?;
    promote(ctx, &repo).await?;

    Ok(format!(
        "Stage build of {} {} promoted to {}",
        job.component_ref().package_name(),
        version,
        MASTER_BRANCH
    ))
}

/// Clones `stage` and commits the version bump and changelog entry locally.
async fn commit_release<S, P>(
    ctx: &BuildContext<'_, S, P>,
    job: &BuildJob,
    tree: &WorkingTree,
) -> Result<(Repository, Version)>
where
    S: EntityStore,
    P: PackageManager,
{
    let component = job.component_ref();
    let url = ctx.config.git.clone_url(&component, &Transport::Authenticated);

    ctx.ensure_active()?;
    let repo = Repository::clone(
        &ctx.config.git,
        &url,
        Transport::Authenticated,
        Some(STAGE_BRANCH),
        None,
        &tree.component_dir(&component.slug()),
    )
    .await?;

    let mut changed: Vec<&str> = Vec::new();
    let version = if job.bump_version {
        let (previous, next) = bump_patch_version(repo.path())?;
        info!(from = %previous, to = %next, "Bumped version");
        changed.push(MANIFEST);
        if repo.path().join(LOCK_FILE).is_file() {
            changed.push(LOCK_FILE);
        }
        next
    } else {
        read_version(repo.path())?
    };

    ctx.ensure_active()?;
    if update_changelog(&repo, &version.to_string(), Utc::now().date_naive()).await? {
        changed.push(CHANGELOG);
    }

    if !changed.is_empty() {
        repo.add(&changed).await?;
    }
    if repo.has_staged_changes().await? {
        ctx.ensure_active()?;
        let sha = repo.commit(STAGE_COMMIT_MESSAGE).await?;
        debug!(sha = %sha, files = ?changed, "Committed release files on stage");
    }
    Ok((repo, version))
}

/// Merges stage into master, merges master back into stage and pushes both.
///
/// A failed back-merge is logged and skipped; stage is then pushed as it was
/// before the attempt.
async fn promote<S, P>(ctx: &BuildContext<'_, S, P>, repo: &Repository) -> Result<()>
where
    S: EntityStore,
    P: PackageManager,
{
    ctx.ensure_active()?;
    repo.checkout(MASTER_BRANCH).await?;
    let promoted = merge(repo, STAGE_BRANCH, ConflictPolicy::Theirs, PROMOTE_MESSAGE).await?;
    debug!(result = ?promoted, "Merged stage into master");

    ctx.ensure_active()?;
    repo.checkout(STAGE_BRANCH).await?;
    match merge(repo, MASTER_BRANCH, ConflictPolicy::Ours, BACK_MERGE_MESSAGE).await {
        Ok(result) => debug!(result = ?result, "Merged master back into stage"),
        Err(e) => warn!(error = %e, "Back-merge of master into stage failed, continuing"),
    }

    ctx.ensure_active()?;
    push_branches(repo, &[STAGE_BRANCH, MASTER_BRANCH])
        .await?
        .into_result()?;
    Ok(())
}
