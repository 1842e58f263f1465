//! Typed access to the records this crate persists.
//!
//! | Kind                  | Key                                                   |
//! |-----------------------|-------------------------------------------------------|
//! | `BuildJob`            | `BuildJob:<id>`                                       |
//! | `TestRun`             | `TestRun:<id>`                                        |
//! | `ComponentTestResult` | `TestRun:<id>/ComponentTestResult:<slug>`             |
//! | `ExecutionLog`        | `.../ComponentTestResult:<slug>/ExecutionLog:<n>`     |
//! | `CoverageRun`         | `CoverageRun:<id>`                                    |
//! | `Dependency`          | `Dependency:<scoped package name>`                    |
//! | `Component`           | `Component:<scoped package name>`                     |
//! | `Version`             | `Component:<scoped package name>/Version:<version>`   |
//!
//! Status-changing updates go through read-modify-write transactions so that
//! the forward-only lifecycle is checked against the stored record, not a
//! possibly stale copy.

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use super::{Cursor, EntityStore, Filter, Key, Query, Result, StoreError};
use crate::types::{
    BuildJob, ComponentRecord, ComponentRef, ComponentTestResult, CoverageRun, DependencyRecord,
    ExecutionLog, JobId, TestRun, TransitionError, VersionRecord,
};

pub const BUILD_JOB: &str = "BuildJob";
pub const TEST_RUN: &str = "TestRun";
pub const COMPONENT_TEST_RESULT: &str = "ComponentTestResult";
pub const EXECUTION_LOG: &str = "ExecutionLog";
pub const COVERAGE_RUN: &str = "CoverageRun";
pub const DEPENDENCY: &str = "Dependency";
pub const COMPONENT: &str = "Component";
pub const VERSION: &str = "Version";

pub fn build_key(id: &JobId) -> Key {
    Key::root(BUILD_JOB, id.as_str())
}

pub fn test_run_key(id: &JobId) -> Key {
    Key::root(TEST_RUN, id.as_str())
}

pub fn component_result_key(run: &JobId, component: &ComponentRef) -> Key {
    test_run_key(run).child(COMPONENT_TEST_RESULT, component.slug())
}

pub fn coverage_key(id: &JobId) -> Key {
    Key::root(COVERAGE_RUN, id.as_str())
}

pub fn dependency_key(package_name: &str) -> Key {
    Key::root(DEPENDENCY, package_name)
}

pub fn component_key(package_name: &str) -> Key {
    Key::root(COMPONENT, package_name)
}

fn encode<T: Serialize>(record: &T) -> Result<Value> {
    Ok(serde_json::to_value(record)?)
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}

async fn get_typed<S: EntityStore, T: DeserializeOwned>(store: &S, key: &Key) -> Result<Option<T>> {
    store.get(key).await?.map(decode).transpose()
}

/// Read-modify-write of one record inside a transaction.
async fn update_typed<S, T, F>(store: &S, key: &Key, f: F) -> Result<T>
where
    S: EntityStore,
    T: Serialize + DeserializeOwned + Send,
    F: FnOnce(&mut T) -> std::result::Result<(), TransitionError> + Send,
{
    store
        .transaction(key, |tx| {
            let current = tx
                .get(key)?
                .ok_or_else(|| StoreError::NotFound(key.clone()))?;
            let mut record: T = decode(current)?;
            f(&mut record)?;
            tx.put(key.clone(), encode(&record)?)?;
            Ok(record)
        })
        .await
}

/// Collects every page of a query.
async fn query_all<S: EntityStore, T: DeserializeOwned>(store: &S, query: Query) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut cursor: Option<Cursor> = None;
    loop {
        let page = store.query(&query.clone().cursor(cursor)).await?;
        for (_, doc) in page.items {
            out.push(decode(doc)?);
        }
        match page.next_cursor {
            Some(next) => cursor = Some(next),
            None => break,
        }
    }
    Ok(out)
}

// ─── Builds ───

pub async fn insert_build<S: EntityStore>(store: &S, job: &BuildJob) -> Result<()> {
    store.upsert(&build_key(&job.id), encode(job)?).await
}

pub async fn get_build<S: EntityStore>(store: &S, id: &JobId) -> Result<Option<BuildJob>> {
    get_typed(store, &build_key(id)).await
}

/// Applies a status-checked change to a stored build.
pub async fn update_build<S, F>(store: &S, id: &JobId, f: F) -> Result<BuildJob>
where
    S: EntityStore,
    F: FnOnce(&mut BuildJob) -> std::result::Result<(), TransitionError> + Send,
{
    update_typed(store, &build_key(id), f).await
}

// ─── Test runs ───

pub async fn insert_test_run<S: EntityStore>(store: &S, run: &TestRun) -> Result<()> {
    store.upsert(&test_run_key(&run.id), encode(run)?).await
}

pub async fn get_test_run<S: EntityStore>(store: &S, id: &JobId) -> Result<Option<TestRun>> {
    get_typed(store, &test_run_key(id)).await
}

pub async fn update_test_run<S, F>(store: &S, id: &JobId, f: F) -> Result<TestRun>
where
    S: EntityStore,
    F: FnOnce(&mut TestRun) -> std::result::Result<(), TransitionError> + Send,
{
    update_typed(store, &test_run_key(id), f).await
}

/// Resets a test run to its freshly-created state.
///
/// Deletes every component result and execution log under the run and
/// rewrites the run record, in one transaction.
pub async fn reset_test_run<S: EntityStore>(store: &S, id: &JobId) -> Result<TestRun> {
    let key = test_run_key(id);
    store
        .transaction(&key, |tx| {
            let current: TestRun = decode(
                tx.get(&key)?
                    .ok_or_else(|| StoreError::NotFound(key.clone()))?,
            )?;
            let reset = current.reset();
            tx.delete_descendants(&key)?;
            tx.put(key.clone(), encode(&reset)?)?;
            Ok(reset)
        })
        .await
}

/// Creates the result row for a component, replacing any previous row and its logs.
pub async fn recreate_component_result<S: EntityStore>(
    store: &S,
    run: &JobId,
    component: &ComponentRef,
    result: &ComponentTestResult,
) -> Result<()> {
    let key = component_result_key(run, component);
    let doc = encode(result)?;
    store
        .transaction(&key, |tx| {
            tx.delete_descendants(&key)?;
            tx.put(key.clone(), doc)?;
            Ok(())
        })
        .await
}

/// Stores the final state of a component result together with its execution logs.
pub async fn complete_component_result<S: EntityStore>(
    store: &S,
    run: &JobId,
    component: &ComponentRef,
    result: &ComponentTestResult,
    logs: &[ExecutionLog],
) -> Result<()> {
    let key = component_result_key(run, component);
    let doc = encode(result)?;
    let log_docs = logs
        .iter()
        .map(|log| Ok((key.child(EXECUTION_LOG, log.instance.as_str()), encode(log)?)))
        .collect::<Result<Vec<_>>>()?;
    store
        .transaction(&key, |tx| {
            tx.delete_descendants(&key)?;
            tx.put(key.clone(), doc)?;
            for (log_key, log_doc) in log_docs {
                tx.put(log_key, log_doc)?;
            }
            Ok(())
        })
        .await
}

pub async fn get_component_result<S: EntityStore>(
    store: &S,
    run: &JobId,
    component: &ComponentRef,
) -> Result<Option<ComponentTestResult>> {
    get_typed(store, &component_result_key(run, component)).await
}

pub async fn list_component_results<S: EntityStore>(
    store: &S,
    run: &JobId,
) -> Result<Vec<ComponentTestResult>> {
    query_all(
        store,
        Query::kind(COMPONENT_TEST_RESULT).ancestor(test_run_key(run)),
    )
    .await
}

pub async fn list_execution_logs<S: EntityStore>(
    store: &S,
    run: &JobId,
    component: &ComponentRef,
) -> Result<Vec<ExecutionLog>> {
    query_all(
        store,
        Query::kind(EXECUTION_LOG).ancestor(component_result_key(run, component)),
    )
    .await
}

// ─── Coverage ───

pub async fn insert_coverage_run<S: EntityStore>(store: &S, run: &CoverageRun) -> Result<()> {
    store.upsert(&coverage_key(&run.id), encode(run)?).await
}

pub async fn get_coverage_run<S: EntityStore>(
    store: &S,
    id: &JobId,
) -> Result<Option<CoverageRun>> {
    get_typed(store, &coverage_key(id)).await
}

pub async fn update_coverage_run<S, F>(store: &S, id: &JobId, f: F) -> Result<CoverageRun>
where
    S: EntityStore,
    F: FnOnce(&mut CoverageRun) -> std::result::Result<(), TransitionError> + Send,
{
    update_typed(store, &coverage_key(id), f).await
}

// ─── Catalog and dependency graph ───

pub async fn put_dependency_record<S: EntityStore>(
    store: &S,
    record: &DependencyRecord,
) -> Result<()> {
    store
        .upsert(&dependency_key(&record.component), encode(record)?)
        .await
}

pub async fn get_dependency_record<S: EntityStore>(
    store: &S,
    package_name: &str,
) -> Result<Option<DependencyRecord>> {
    get_typed(store, &dependency_key(package_name)).await
}

/// Scoped names of components that declare `package_name` as a dependency.
///
/// Production dependents are always included; dev-only dependents only when
/// `include_dev` is set. Results are sorted and de-duplicated.
pub async fn find_dependents<S: EntityStore>(
    store: &S,
    package_name: &str,
    include_dev: bool,
) -> Result<Vec<String>> {
    let mut names: Vec<String> = query_all::<_, DependencyRecord>(
        store,
        Query::kind(DEPENDENCY).filter(Filter::contains("production", package_name)),
    )
    .await?
    .into_iter()
    .map(|r| r.component)
    .collect();

    if include_dev {
        let dev: Vec<DependencyRecord> = query_all(
            store,
            Query::kind(DEPENDENCY).filter(Filter::contains("development", package_name)),
        )
        .await?;
        names.extend(dev.into_iter().map(|r| r.component));
    }

    names.sort();
    names.dedup();
    Ok(names)
}

/// Writes a component's catalog entry and the entry for one of its versions.
pub async fn put_catalog_entry<S: EntityStore>(
    store: &S,
    component: &ComponentRecord,
    version: &VersionRecord,
) -> Result<()> {
    let key = component_key(&component.name);
    let component_doc = encode(component)?;
    let version_doc = encode(version)?;
    store
        .transaction(&key, |tx| {
            tx.put(key.child(VERSION, version.version.as_str()), version_doc)?;
            tx.put(key.clone(), component_doc)?;
            Ok(())
        })
        .await
}

pub async fn get_component<S: EntityStore>(
    store: &S,
    package_name: &str,
) -> Result<Option<ComponentRecord>> {
    get_typed(store, &component_key(package_name)).await
}

pub async fn list_versions<S: EntityStore>(
    store: &S,
    package_name: &str,
) -> Result<Vec<VersionRecord>> {
    query_all(
        store,
        Query::kind(VERSION).ancestor(component_key(package_name)),
    )
    .await
}

/// Catalog components carrying `tag`, in key order.
pub async fn list_components_tagged<S: EntityStore>(
    store: &S,
    tag: &str,
) -> Result<Vec<ComponentRecord>> {
    query_all(
        store,
        Query::kind(COMPONENT).filter(Filter::contains("tags", tag)),
    )
    .await
}
