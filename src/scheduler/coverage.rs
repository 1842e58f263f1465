//! Coverage runs: one component at one tag, executor in coverage mode.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{PackageManager, TestExecutor, TestOptions};
use crate::git::{Repository, Transport, WorkingTree};
use crate::store::{EntityStore, records};
use crate::types::{CoverageRun, CoverageSummary, JobId, JobStatus};
use crate::worker::JobRunner;

use super::{Result, SchedulerConfig, ensure_active};

/// Runs coverage runs for the coverage queue.
pub struct CoverageRunner<S, P, E> {
    store: Arc<S>,
    packages: Arc<P>,
    executor: Arc<E>,
    config: SchedulerConfig,
}

impl<S, P, E> CoverageRunner<S, P, E>
where
    S: EntityStore,
    P: PackageManager,
    E: TestExecutor,
{
    pub fn new(store: Arc<S>, packages: Arc<P>, executor: Arc<E>, config: SchedulerConfig) -> Self {
        CoverageRunner {
            store,
            packages,
            executor,
            config,
        }
    }

    #[instrument(skip_all, fields(run = %id))]
    async fn execute(&self, id: &JobId, cancel: &CancellationToken) -> Result<()> {
        let store = self.store.as_ref();
        let Some(run) = records::get_coverage_run(store, id).await? else {
            warn!("Coverage run record not found");
            return Ok(());
        };
        if run.status != JobStatus::Queued {
            debug!(status = %run.status, "Coverage run already handled, skipping");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let run = records::update_coverage_run(store, id, |r| r.start()).await?;
        let outcome = if self.config.excluded.contains(&run.component_ref()) {
            info!("Component is excluded, skipping coverage");
            Ok(None)
        } else {
            let tree = WorkingTree::create(&self.config.work_root, id)?;
            let result = self.measure(&run, &tree, cancel).await;
            tree.release().await;
            result.map(Some)
        };

        if cancel.is_cancelled() {
            info!("Coverage run cancelled, record left as is");
            return Ok(());
        }
        let update = move |r: &mut CoverageRun| match outcome {
            Ok(Some(summary)) => {
                r.coverage = Some(summary);
                r.finish(false, format!("Line coverage {:.2}%", summary.lines))
            }
            Ok(None) => r.finish(false, "Component is excluded from coverage"),
            Err(e) => {
                error!(error = %e, "Coverage run failed");
                r.finish(true, e.to_string())
            }
        };
        records::update_coverage_run(store, id, update).await?;
        Ok(())
    }

    async fn measure(
        &self,
        run: &CoverageRun,
        tree: &WorkingTree,
        cancel: &CancellationToken,
    ) -> Result<CoverageSummary> {
        let component = run.component_ref();
        let url = self.config.git.clone_url(&component, &Transport::ReadOnly);

        ensure_active(cancel)?;
        let repo = Repository::clone(
            &self.config.git,
            &url,
            Transport::ReadOnly,
            Some(&run.tag),
            Some(1),
            &tree.component_dir(&component.slug()),
        )
        .await?;

        ensure_active(cancel)?;
        self.packages.install(repo.path()).await?;

        ensure_active(cancel)?;
        let options = TestOptions {
            component: component.package_name(),
            branch: run.tag.clone(),
            coverage: true,
        };
        let summary = self.executor.run_coverage(repo.path(), &options).await?;
        info!(
            lines = summary.lines,
            branches = summary.branches,
            "Coverage measured"
        );
        Ok(summary)
    }
}

impl<S, P, E> JobRunner for CoverageRunner<S, P, E>
where
    S: EntityStore,
    P: PackageManager,
    E: TestExecutor,
{
    async fn run(&self, id: JobId, cancel: CancellationToken) {
        if let Err(e) = self.execute(&id, &cancel).await {
            error!(run = %id, error = %e, "Failed to record coverage outcome");
        }
    }
}
