//! Test run scheduler.
//!
//! A [`TestRun`] expands into an ordered list of components (see
//! [`scope::resolve_scope`]) that are tested strictly one at a time in a
//! single working tree, one subdirectory per component:
//!
//! ```text
//!  running ─► resolve scope ─► persist scope size ─► for each component:
//!      create result ─► clone ─► models? ─► install ─► inject target branch? ─► execute
//!      ─► record passed/failed (never aborts the run)
//!  ─► finished
//! ```
//!
//! A component that fails to prepare or whose executor fails is recorded as
//! failed and counted; the run continues with the next component. Store
//! failures abort the run. Cancellation is checked before every step, and a
//! cancelled run returns without further writes.

pub mod coverage;
pub mod scope;

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::executor::{
    ExecutorError, ModelGenerator, PackageManager, ResultAccumulator, TestExecutor, TestOptions,
    apis_manifest, branch_dependency_spec,
};
use crate::git::{GitConfig, GitError, Repository, Transport, WorkingTree};
use crate::pubsub::{Action, Notification, PubSubError, Publisher};
use crate::store::{EntityStore, StoreError, records};
use crate::types::{
    ComponentRef, ComponentTestResult, ExclusionList, JobId, JobStatus, TestRun, TestRunKind,
};
use crate::worker::JobRunner;

pub use coverage::CoverageRunner;
pub use scope::resolve_scope;

/// Branch dependents are tested from in bottom-up runs.
pub const DEPENDENT_BRANCH: &str = "master";

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("operation cancelled")]
    Cancelled,

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("failed to notify: {0}")]
    Notify(#[from] PubSubError),

    #[error("invalid target component: {0:?}")]
    InvalidTarget(String),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub work_root: PathBuf,
    pub git: GitConfig,
    pub excluded: ExclusionList,
    /// Catalog tag selecting the full-catalog scope.
    pub scope_tag: String,
}

/// Runs test runs for the tests queue.
pub struct TestRunner<S, P, E, M> {
    store: Arc<S>,
    packages: Arc<P>,
    executor: Arc<E>,
    models: Arc<M>,
    config: SchedulerConfig,
}

impl<S, P, E, M> TestRunner<S, P, E, M>
where
    S: EntityStore,
    P: PackageManager,
    E: TestExecutor,
    M: ModelGenerator,
{
    pub fn new(
        store: Arc<S>,
        packages: Arc<P>,
        executor: Arc<E>,
        models: Arc<M>,
        config: SchedulerConfig,
    ) -> Self {
        TestRunner {
            store,
            packages,
            executor,
            models,
            config,
        }
    }

    #[instrument(skip_all, fields(run = %id))]
    async fn execute(&self, id: &JobId, cancel: &CancellationToken) -> Result<()> {
        let store = self.store.as_ref();
        let Some(run) = records::get_test_run(store, id).await? else {
            warn!("Test run record not found");
            return Ok(());
        };
        if run.status != JobStatus::Queued {
            debug!(status = %run.status, "Test run already handled, skipping");
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Ok(());
        }

        let run = records::update_test_run(store, id, |r| r.start()).await?;
        let outcome = self.run_components(&run, cancel).await;

        if cancel.is_cancelled() {
            info!("Test run cancelled, record left as is");
            return Ok(());
        }
        let (error, message) = match outcome {
            Ok(message) => {
                info!(message = %message, "Test run finished");
                (false, message)
            }
            Err(e) => {
                error!(error = %e, "Test run failed");
                (true, e.to_string())
            }
        };
        records::update_test_run(store, id, move |r| r.finish(error, message)).await?;
        Ok(())
    }

    /// Tests every component in scope. Returns the summary message.
    async fn run_components(&self, run: &TestRun, cancel: &CancellationToken) -> Result<String> {
        let store = self.store.as_ref();
        let components = resolve_scope(
            store,
            run,
            &self.config.excluded,
            &self.config.scope_tag,
        )
        .await?;
        ensure_active(cancel)?;

        let scope_size = components.len() as u32;
        records::update_test_run(store, &run.id, move |r| {
            r.scope_size = scope_size;
            Ok(())
        })
        .await?;
        info!(scope_size, kind = %run.kind, branch = %run.branch, "Resolved test scope");

        let tree = WorkingTree::create(&self.config.work_root, &run.id)?;
        let result = self.test_all(run, &components, &tree, cancel).await;
        tree.release().await;
        let (passed, failed) = result?;

        Ok(format!(
            "{} of {} components passed, {} failed",
            passed, scope_size, failed
        ))
    }

    async fn test_all(
        &self,
        run: &TestRun,
        components: &[ComponentRef],
        tree: &WorkingTree,
        cancel: &CancellationToken,
    ) -> Result<(u32, u32)> {
        let store = self.store.as_ref();
        let (mut passed, mut failed) = (0, 0);
        for component in components {
            ensure_active(cancel)?;
            let ok = self.test_component(run, component, tree, cancel).await?;
            if ok {
                passed += 1;
            } else {
                failed += 1;
            }
            records::update_test_run(store, &run.id, move |r| {
                if ok {
                    r.passed_count += 1;
                } else {
                    r.failed_count += 1;
                }
                Ok(())
            })
            .await?;
        }
        Ok((passed, failed))
    }

    /// Tests one component and records its result. Returns whether it passed.
    ///
    /// Only cancellation and store failures are errors.
    #[instrument(skip_all, fields(component = %component))]
    async fn test_component(
        &self,
        run: &TestRun,
        component: &ComponentRef,
        tree: &WorkingTree,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        let store = self.store.as_ref();
        let mut result = ComponentTestResult::running(component);
        records::recreate_component_result(store, &run.id, component, &result).await?;

        let mut results = ResultAccumulator::new();
        let outcome = self
            .prepare_and_execute(run, component, tree, cancel, &mut results)
            .await;

        match outcome {
            Ok(()) => result.complete(results.totals(), results.has_logs(), results.has_errors()),
            Err(SchedulerError::Cancelled) => return Err(SchedulerError::Cancelled),
            Err(e @ SchedulerError::Store(_)) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Component test failed");
                result.has_logs = results.has_logs();
                result.totals = results.totals();
                result.fail(e.to_string());
            }
        }
        if cancel.is_cancelled() {
            return Err(SchedulerError::Cancelled);
        }

        records::complete_component_result(store, &run.id, component, &result, results.logs())
            .await?;
        debug!(status = ?result.status, total = result.totals.total, "Component tested");
        Ok(result.is_passed())
    }

    async fn prepare_and_execute(
        &self,
        run: &TestRun,
        component: &ComponentRef,
        tree: &WorkingTree,
        cancel: &CancellationToken,
        results: &mut ResultAccumulator,
    ) -> Result<()> {
        let target = run.target();
        let is_dependent =
            run.kind == TestRunKind::BottomUp && target.as_ref() != Some(component);
        let branch = if is_dependent {
            DEPENDENT_BRANCH
        } else {
            run.branch.as_str()
        };

        ensure_active(cancel)?;
        let dir = self.clone_component(component, branch, tree).await?;

        if apis_manifest(&dir).is_some() {
            ensure_active(cancel)?;
            debug!("Generating API models");
            self.models.generate(&dir).await?;
        }

        ensure_active(cancel)?;
        self.packages.install(&dir).await?;

        if is_dependent && let Some(target) = target {
            ensure_active(cancel)?;
            let spec = branch_dependency_spec(&target.organization, &target.name, &run.branch);
            debug!(spec = %spec, "Installing target branch");
            self.packages.add_dependency(&dir, &spec).await?;
        }

        ensure_active(cancel)?;
        let options = TestOptions {
            component: component.package_name(),
            branch: branch.to_string(),
            coverage: false,
        };
        self.executor.run_tests(&dir, &options, results).await?;
        Ok(())
    }

    async fn clone_component(
        &self,
        component: &ComponentRef,
        branch: &str,
        tree: &WorkingTree,
    ) -> Result<PathBuf> {
        let url = self.config.git.clone_url(component, &Transport::ReadOnly);
        let dest = tree.component_dir(&component.slug());
        let repo = Repository::clone(
            &self.config.git,
            &url,
            Transport::ReadOnly,
            Some(branch),
            Some(1),
            &dest,
        )
        .await?;
        Ok(repo.path().to_path_buf())
    }
}

impl<S, P, E, M> JobRunner for TestRunner<S, P, E, M>
where
    S: EntityStore,
    P: PackageManager,
    E: TestExecutor,
    M: ModelGenerator,
{
    async fn run(&self, id: JobId, cancel: CancellationToken) {
        if let Err(e) = self.execute(&id, &cancel).await {
            error!(run = %id, error = %e, "Failed to record test run outcome");
        }
    }
}

fn ensure_active(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(SchedulerError::Cancelled);
    }
    Ok(())
}

/// Resets a test run to its freshly created state and queues it again.
pub async fn reset_and_requeue<S, B>(store: &S, publisher: &B, id: &JobId) -> Result<TestRun>
where
    S: EntityStore,
    B: Publisher,
{
    let run = records::reset_test_run(store, id).await?;
    publisher
        .publish(&Notification::new(Action::RunTest, id.clone()))
        .await?;
    info!(run = %id, "Test run reset and re-queued");
    Ok(run)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::test_utils::{
        FakeModelGenerator, FakeOutcome, FakePackageManager, FakeTestExecutor, PackageCall,
        RecordingPublisher, TestRemote, test_git_config,
    };
    use crate::types::{ComponentStatus, DependencyRecord};
    use chrono::Utc;
    use tempfile::TempDir;

    struct Harness {
        remote: TestRemote,
        store: Arc<MemoryStore>,
        packages: Arc<FakePackageManager>,
        executor: Arc<FakeTestExecutor>,
        models: Arc<FakeModelGenerator>,
        config: SchedulerConfig,
        _work: TempDir,
    }

    impl Harness {
        /// A remote with `date-time` and the given extra components.
        fn new(others: &[&str]) -> Harness {
            let remote = TestRemote::new("o", "date-time", "1.0.0");
            for name in others {
                remote.add_repo("o", name, "1.0.0");
            }
            let work = TempDir::new().unwrap();
            let config = SchedulerConfig {
                work_root: work.path().join("trees"),
                git: test_git_config(remote.base_url()),
                excluded: ExclusionList::parse("api-console"),
                scope_tag: "arc".to_string(),
            };
            Harness {
                remote,
                store: Arc::new(MemoryStore::new()),
                packages: Arc::new(FakePackageManager::new()),
                executor: Arc::new(FakeTestExecutor::new()),
                models: Arc::new(FakeModelGenerator::new()),
                config,
                _work: work,
            }
        }

        fn runner(
            &self,
        ) -> TestRunner<MemoryStore, FakePackageManager, FakeTestExecutor, FakeModelGenerator>
        {
            TestRunner::new(
                self.store.clone(),
                self.packages.clone(),
                self.executor.clone(),
                self.models.clone(),
                self.config.clone(),
            )
        }

        async fn depends_on_date_time(&self, name: &str, dev: bool) {
            let dep = vec!["@o/date-time".to_string()];
            let (production, development) = if dev { (vec![], dep) } else { (dep, vec![]) };
            records::put_dependency_record(
                self.store.as_ref(),
                &DependencyRecord {
                    component: format!("@o/{}", name),
                    production,
                    development,
                    updated_at: Utc::now(),
                },
            )
            .await
            .unwrap();
        }

        async fn run(&self, run: TestRun) -> TestRun {
            records::insert_test_run(self.store.as_ref(), &run)
                .await
                .unwrap();
            self.runner()
                .run(run.id.clone(), CancellationToken::new())
                .await;
            records::get_test_run(self.store.as_ref(), &run.id)
                .await
                .unwrap()
                .unwrap()
        }

        fn leftover_trees(&self) -> usize {
            std::fs::read_dir(&self.config.work_root)
                .map(|entries| entries.count())
                .unwrap_or(0)
        }
    }

    fn date_time() -> ComponentRef {
        ComponentRef::new("o", "date-time")
    }

    #[tokio::test]
    async fn bottom_up_tests_target_and_production_dependents() {
        let h = Harness::new(&["a", "b"]);
        h.depends_on_date_time("a", false).await;
        h.depends_on_date_time("b", true).await;

        let run = h.run(TestRun::bottom_up(&date_time(), "stage", false)).await;

        assert_eq!(run.status, JobStatus::Finished);
        assert!(!run.error, "{:?}", run.message);
        assert_eq!(run.scope_size, 2);
        assert_eq!(run.passed_count, 2);
        assert_eq!(h.executor.tested(), vec!["@o/date-time", "@o/a"]);

        let branches: Vec<String> = h.executor.runs().into_iter().map(|o| o.branch).collect();
        assert_eq!(branches, vec!["stage", "master"]);

        let injected: Vec<String> = h
            .packages
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PackageCall::AddDependency(dir, spec) => {
                    assert!(dir.ends_with(ComponentRef::new("o", "a").slug()));
                    Some(spec)
                }
                _ => None,
            })
            .collect();
        assert_eq!(injected, vec!["github:o/date-time#stage"]);

        let results = records::list_component_results(h.store.as_ref(), &run.id)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.status == ComponentStatus::Passed));
        let logs = records::list_execution_logs(h.store.as_ref(), &run.id, &date_time())
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(h.leftover_trees(), 0);
    }

    #[tokio::test]
    async fn one_failing_component_does_not_abort_the_run() {
        let h = Harness::new(&["a", "b", "c", "d"]);
        for name in ["a", "b", "c", "d"] {
            h.depends_on_date_time(name, false).await;
        }
        h.executor
            .script("@o/b", FakeOutcome::Crash("browser launch failed".to_string()));
        h.executor
            .script("@o/c", FakeOutcome::Results { passed: 2, failed: 1 });

        let run = h.run(TestRun::bottom_up(&date_time(), "stage", false)).await;

        assert_eq!(run.status, JobStatus::Finished);
        assert!(!run.error);
        assert_eq!(run.scope_size, 5);
        assert_eq!(run.passed_count, 3);
        assert_eq!(run.failed_count, 2);
        assert_eq!(run.completed_count(), run.scope_size);

        let results = records::list_component_results(h.store.as_ref(), &run.id)
            .await
            .unwrap();
        assert_eq!(results.len(), 5);
        assert!(results.iter().all(|r| r.status != ComponentStatus::Running));
        let crashed = records::get_component_result(
            h.store.as_ref(),
            &run.id,
            &ComponentRef::new("o", "b"),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(crashed.status, ComponentStatus::Failed);
        assert_eq!(crashed.message.as_deref(), Some("invalid report: browser launch failed"));
    }

    #[tokio::test]
    async fn clone_and_install_failures_are_isolated() {
        let h = Harness::new(&["a"]);
        h.depends_on_date_time("a", false).await;
        h.depends_on_date_time("missing-repo", false).await;
        h.packages
            .fail_install_in(&ComponentRef::new("o", "a").slug());

        let run = h.run(TestRun::bottom_up(&date_time(), "stage", false)).await;

        assert_eq!(run.scope_size, 3);
        assert_eq!(run.passed_count, 1);
        assert_eq!(run.failed_count, 2);
        assert_eq!(h.executor.tested(), vec!["@o/date-time"]);
    }

    #[tokio::test]
    async fn excluded_components_get_no_result() {
        let h = Harness::new(&["a", "api-console"]);
        h.depends_on_date_time("a", false).await;
        h.depends_on_date_time("api-console", false).await;

        let run = h.run(TestRun::bottom_up(&date_time(), "stage", false)).await;

        assert_eq!(run.scope_size, 2);
        let missing = records::get_component_result(
            h.store.as_ref(),
            &run.id,
            &ComponentRef::new("o", "api-console"),
        )
        .await
        .unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn models_generated_when_component_lists_apis() {
        let h = Harness::new(&[]);
        h.remote
            .commit_file("stage", "demo/apis.json", "{}", "Add demo APIs");

        let run = h.run(TestRun::bottom_up(&date_time(), "stage", false)).await;

        assert!(!run.error);
        assert_eq!(h.models.dirs().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_stays_queued() {
        let h = Harness::new(&[]);
        let run = TestRun::bottom_up(&date_time(), "stage", false);
        records::insert_test_run(h.store.as_ref(), &run).await.unwrap();
        let cancel = CancellationToken::new();
        cancel.cancel();

        h.runner().run(run.id.clone(), cancel).await;

        let stored = records::get_test_run(h.store.as_ref(), &run.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, JobStatus::Queued);
        assert!(h.executor.tested().is_empty());
    }

    #[tokio::test]
    async fn reset_clears_results_and_requeues() {
        let h = Harness::new(&["a"]);
        h.depends_on_date_time("a", false).await;
        let finished = h.run(TestRun::bottom_up(&date_time(), "stage", false)).await;
        assert_eq!(finished.passed_count, 2);

        let publisher = RecordingPublisher::new();
        let reset = reset_and_requeue(h.store.as_ref(), &publisher, &finished.id)
            .await
            .unwrap();

        assert_eq!(reset.status, JobStatus::Queued);
        assert_eq!(reset.passed_count, 0);
        assert_eq!(reset.created_at, finished.created_at);
        assert!(
            records::list_component_results(h.store.as_ref(), &finished.id)
                .await
                .unwrap()
                .is_empty()
        );
        assert_eq!(
            publisher.sent(),
            vec![Notification::new(Action::RunTest, finished.id.clone())]
        );

        // The reset run runs again from scratch.
        h.runner()
            .run(finished.id.clone(), CancellationToken::new())
            .await;
        let rerun = records::get_test_run(h.store.as_ref(), &finished.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(rerun.passed_count, 2);
        assert_eq!(rerun.status, JobStatus::Finished);
    }
}
