//! Core domain types for the CI backend.
//!
//! This module contains the persisted job records and identifiers used throughout
//! the application, designed to encode invariants (like forward-only status) via
//! the type system.

pub mod build;
pub mod catalog;
pub mod coverage;
pub mod exclusion;
pub mod ids;
pub mod status;
pub mod test_run;

pub use build::{BuildJob, BuildKind};
pub use catalog::{ComponentRecord, DependencyRecord, VersionRecord};
pub use coverage::{CoverageRun, CoverageSummary};
pub use exclusion::ExclusionList;
pub use ids::{ComponentRef, InvalidSha, JobId, Sha, slugify};
pub use status::{JobStatus, TransitionError};
pub use test_run::{
    ComponentStatus, ComponentTestResult, ExecutionLog, TestRun, TestRunKind, TestTotals,
};
