//! Master build: tag the released version.

use tracing::info;

use crate::executor::PackageManager;
use crate::git::push::push_tag;
use crate::git::{Repository, Transport, WorkingTree};
use crate::store::EntityStore;
use crate::types::BuildJob;

use super::manifest::read_version;
use super::{BuildContext, MASTER_BRANCH, PipelineError, Result};

pub async fn run<S, P>(
    ctx: &BuildContext<'_, S, P>,
    job: &BuildJob,
    tree: &WorkingTree,
) -> Result<String>
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
        Some(MASTER_BRANCH),
        None,
        &tree.component_dir(&component.slug()),
    )
    .await?;

    let tag = read_version(repo.path())?.to_string();

    ctx.ensure_active()?;
    if repo.local_tag_exists(&tag).await? || repo.remote_tag_exists(&tag).await? {
        return Err(PipelineError::TagExists { tag });
    }

    let target = job.commit_sha.as_deref().unwrap_or("HEAD");
    repo.create_annotated_tag(&tag, target, &format!("Release {}", tag))
        .await?;
    info!(tag = %tag, target, "Created release tag");

    ctx.ensure_active()?;
    push_tag(&repo, &tag).await?.into_result()?;

    Ok(format!("Released {} as {}", component.package_name(), tag))
}
