//! Test run scope resolution.

use tracing::debug;

use crate::store::{EntityStore, records};
use crate::types::{ComponentRef, ExclusionList, TestRun, TestRunKind};

use super::{Result, SchedulerError};

/// Resolves the ordered list of components a run tests.
///
/// - full-catalog: catalog components carrying `scope_tag`.
/// - bottom-up: the target followed by the components that depend on it in
///   production (and in development, if requested).
///
/// Excluded components are dropped, as are names that are not valid scoped
/// package names. The list contains no duplicates.
pub async fn resolve_scope<S: EntityStore>(
    store: &S,
    run: &TestRun,
    excluded: &ExclusionList,
    scope_tag: &str,
) -> Result<Vec<ComponentRef>> {
    let names: Vec<String> = match run.kind {
        TestRunKind::FullCatalog => records::list_components_tagged(store, scope_tag)
            .await?
            .into_iter()
            .map(|c| c.name)
            .collect(),
        TestRunKind::BottomUp => {
            let target = run.target().ok_or_else(|| {
                SchedulerError::InvalidTarget(run.target_component.clone().unwrap_or_default())
            })?;
            let target_name = target.package_name();
            let mut names = vec![target_name.clone()];
            names.extend(
                records::find_dependents(store, &target_name, run.include_dev_dependents).await?,
            );
            names
        }
    };

    let mut scope: Vec<ComponentRef> = Vec::with_capacity(names.len());
    for name in names {
        let Some(component) = ComponentRef::parse(&name) else {
            debug!(name = %name, "Dropping component without organization or name");
            continue;
        };
        if excluded.contains(&component) {
            debug!(component = %component, "Dropping excluded component");
            continue;
        }
        if !scope.contains(&component) {
            scope.push(component);
        }
    }
    Ok(scope)
}
