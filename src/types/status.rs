//! Job lifecycle status and its forward-only transition rules.
//!
//! Every persisted job (build, test run, coverage run) moves through
//! `queued -> running -> finished`. `finished` is terminal. Resetting a test run
//! does not "un-finish" a record: it replaces it with a fresh `queued` record
//! (see [`crate::store::records::reset_test_run`]).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle status of a persisted job record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Created and waiting for a worker.
    Queued,

    /// A pipeline or scheduler instance owns the record.
    Running,

    /// Terminal. Check the record's `error` flag for the outcome.
    Finished,
}

impl JobStatus {
    /// Returns true for the terminal status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Finished)
    }

    /// Validates a status change and returns the new status.
    ///
    /// Allowed: `queued -> running`, `queued -> finished` (excluded or failed
    /// before start), `running -> finished`. Everything else is rejected,
    /// including a transition to the same status.
    pub fn transition(self, to: JobStatus) -> Result<JobStatus, TransitionError> {
        match (self, to) {
            (JobStatus::Queued, JobStatus::Running)
            | (JobStatus::Queued, JobStatus::Finished)
            | (JobStatus::Running, JobStatus::Finished) => Ok(to),
            (from, to) => Err(TransitionError { from, to }),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Finished => "finished",
        };
        f.write_str(s)
    }
}

/// Error returned when a status transition would move backwards or leave
/// the terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid status transition from {from} to {to}")]
pub struct TransitionError {
    pub from: JobStatus,
    pub to: JobStatus,
}
