//! Coverage run records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{ComponentRef, JobId};
use super::status::{JobStatus, TransitionError};

/// Coverage percentages reported by the executor in coverage mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CoverageSummary {
    pub lines: f64,
    pub statements: f64,
    pub functions: f64,
    pub branches: f64,
}

/// A request to measure test coverage of one component at one tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoverageRun {
    pub id: JobId,
    pub component: String,
    pub organization: String,
    pub tag: String,
    pub status: JobStatus,
    pub error: bool,
    pub message: Option<String>,
    pub coverage: Option<CoverageSummary>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl CoverageRun {
    pub fn new(component: &ComponentRef, tag: impl Into<String>) -> Self {
        CoverageRun {
            id: JobId::generate(),
            component: component.name.clone(),
            organization: component.organization.clone(),
            tag: tag.into(),
            status: JobStatus::Queued,
            error: false,
            message: None,
            coverage: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }

    pub fn component_ref(&self) -> ComponentRef {
        ComponentRef::new(&self.organization, &self.component)
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
}
