//! Tag build: catalog metadata, dependency graph and package publication.

use chrono::Utc;
use tracing::{debug, info, warn};

use crate::executor::PackageManager;
use crate::git::{Repository, Transport, WorkingTree};
use crate::store::{EntityStore, records};
use crate::types::BuildJob;

use super::catalog::{catalog_entry, dependency_record};
use super::manifest::{Version, read_manifest};
use super::{BuildContext, PipelineError, Result};

pub async fn run<S, P>(
    ctx: &BuildContext<'_, S, P>,
    job: &BuildJob,
    tree: &WorkingTree,
) -> Result<String>
where
    S: EntityStore,
    P: PackageManager,
{
    let release = job
        .release_version
        .as_deref()
        .ok_or(PipelineError::MissingRelease)?;
    let version = Version::parse(release.strip_prefix('v').unwrap_or(release))?;
    let component = job.component_ref();
    let package = component.package_name();
    let url = ctx.config.git.clone_url(&component, &Transport::ReadOnly);

    ctx.ensure_active()?;
    let repo = Repository::clone(
        &ctx.config.git,
        &url,
        Transport::ReadOnly,
        Some(release),
        Some(1),
        &tree.component_dir(&component.slug()),
    )
    .await?;
    let manifest = read_manifest(repo.path())?;
    let now = Utc::now();

    ctx.ensure_active()?;
    let dependencies = dependency_record(&manifest, &component, now);
    debug!(
        production = dependencies.production.len(),
        development = dependencies.development.len(),
        "Updating dependency record"
    );
    records::put_dependency_record(ctx.store, &dependencies).await?;

    let dist_tag = version.dist_tag();
    let publish = if ctx.config.publishes(&component.organization) {
        ctx.ensure_active()?;
        Some(ctx.packages.publish(repo.path(), dist_tag).await)
    } else {
        info!(organization = %component.organization, "Publishing not enabled for organization");
        None
    };

    // The catalog entry is written once, with the publish outcome.
    let previous = records::get_component(ctx.store, &package).await?;
    let (entry, mut version_entry) =
        catalog_entry(&manifest, &component, &version, previous.as_ref(), now);
    match &publish {
        Some(Ok(())) => version_entry.published = true,
        Some(Err(e)) => {
            warn!(dist_tag, error = %e, "Publish failed");
            version_entry.publish_error = Some(e.to_string());
        }
        None => {}
    }
    records::put_catalog_entry(ctx.store, &entry, &version_entry).await?;

    match publish {
        None => Ok(format!("Catalog updated for {}@{}", package, version)),
        Some(Ok(())) => Ok(format!("Published {}@{} under {}", package, version, dist_tag)),
        Some(Err(e)) => Err(e.into()),
    }
}
