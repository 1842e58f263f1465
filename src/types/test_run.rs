//! Test run records and their per-component children.
//!
//! Storage layout (kind + ancestor path):
//!
//! ```text
//! TestRun(<run id>)
//!   ComponentTestResult(<component slug>)
//!     ExecutionLog(<executor instance>)
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::ids::{ComponentRef, JobId};
use super::status::{JobStatus, TransitionError};

/// How the component scope of a test run is resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TestRunKind {
    /// Every catalog component tagged as in scope.
    FullCatalog,
    /// The target component plus the components that depend on it.
    BottomUp,
}

impl fmt::Display for TestRunKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TestRunKind::FullCatalog => "full-catalog",
            TestRunKind::BottomUp => "bottom-up",
        };
        f.write_str(s)
    }
}

/// One cross-component regression request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestRun {
    pub id: JobId,
    pub kind: TestRunKind,
    pub branch: String,
    /// Scoped package name of the target (bottom-up runs only).
    pub target_component: Option<String>,
    pub include_dev_dependents: bool,
    pub scope_size: u32,
    pub passed_count: u32,
    pub failed_count: u32,
    pub status: JobStatus,
    pub error: bool,
    pub message: Option<String>,
    /// Opaque reference to the identity that requested the run.
    pub creator: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl TestRun {
    /// Creates a queued full-catalog run.
    pub fn full_catalog(branch: impl Into<String>) -> Self {
        Self::blank(TestRunKind::FullCatalog, branch.into(), None, false)
    }

    /// Creates a queued bottom-up run for `target`.
    pub fn bottom_up(
        target: &ComponentRef,
        branch: impl Into<String>,
        include_dev_dependents: bool,
    ) -> Self {
        Self::blank(
            TestRunKind::BottomUp,
            branch.into(),
            Some(target.package_name()),
            include_dev_dependents,
        )
    }

    fn blank(
        kind: TestRunKind,
        branch: String,
        target_component: Option<String>,
        include_dev_dependents: bool,
    ) -> Self {
        TestRun {
            id: JobId::generate(),
            kind,
            branch,
            target_component,
            include_dev_dependents,
            scope_size: 0,
            passed_count: 0,
            failed_count: 0,
            status: JobStatus::Queued,
            error: false,
            message: None,
            creator: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn with_creator(mut self, creator: impl Into<String>) -> Self {
        self.creator = Some(creator.into());
        self
    }

    /// The parsed target component, if this is a bottom-up run with a valid target.
    pub fn target(&self) -> Option<ComponentRef> {
        self.target_component
            .as_deref()
            .and_then(ComponentRef::parse)
    }

    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.status = self.status.transition(JobStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    pub fn finish(&mut self, error: bool, message: impl Into<String>) -> Result<(), TransitionError> {
        self.status = self.status.transition(JobStatus::Finished)?;
        self.error = error;
        self.message = Some(message.into());
        self.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Number of components with a terminal result.
    pub fn completed_count(&self) -> u32 {
        self.passed_count + self.failed_count
    }

    /// Returns the record as a freshly created run with the same configuration.
    ///
    /// Only `id`, `created_at` and `creator` survive.
    pub fn reset(&self) -> TestRun {
        TestRun {
            id: self.id.clone(),
            created_at: self.created_at,
            creator: self.creator.clone(),
            ..Self::blank(
                self.kind,
                self.branch.clone(),
                self.target_component.clone(),
                self.include_dev_dependents,
            )
        }
    }
}

/// Outcome of one component within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Running,
    Passed,
    Failed,
}

/// Aggregated test counts for one component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestTotals {
    pub total: u32,
    pub success: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestTotals {
    pub fn add(&mut self, other: &TestTotals) {
        self.total += other.total;
        self.success += other.success;
        self.failed += other.failed;
        self.skipped += other.skipped;
    }
}

/// Result of testing one component within a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComponentTestResult {
    /// Scoped package name.
    pub component: String,
    pub status: ComponentStatus,
    pub totals: TestTotals,
    pub has_logs: bool,
    pub message: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl ComponentTestResult {
    pub fn running(component: &ComponentRef) -> Self {
        ComponentTestResult {
            component: component.package_name(),
            status: ComponentStatus::Running,
            totals: TestTotals::default(),
            has_logs: false,
            message: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Records a completed test execution.
    ///
    /// The component passes only when no test failed and no executor reported an error.
    pub fn complete(&mut self, totals: TestTotals, has_logs: bool, executor_error: bool) {
        self.totals = totals;
        self.has_logs = has_logs;
        self.status = if totals.failed == 0 && !executor_error {
            ComponentStatus::Passed
        } else {
            ComponentStatus::Failed
        };
        self.ended_at = Some(Utc::now());
    }

    /// Records a failure that prevented the tests from completing.
    pub fn fail(&mut self, message: impl Into<String>) {
        self.status = ComponentStatus::Failed;
        self.message = Some(message.into());
        self.ended_at = Some(Utc::now());
    }

    pub fn is_passed(&self) -> bool {
        self.status == ComponentStatus::Passed
    }
}

/// Raw results reported by one executor instance (one browser).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionLog {
    /// Executor instance name, e.g. `chromium`.
    pub instance: String,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub error: Option<String>,
    /// Per-case log entries as reported by the executor.
    #[serde(default)]
    pub entries: Vec<serde_json::Value>,
}

impl ExecutionLog {
    pub fn totals(&self) -> TestTotals {
        TestTotals {
            total: self.passed + self.failed + self.skipped,
            success: self.passed,
            failed: self.failed,
            skipped: self.skipped,
        }
    }
}
