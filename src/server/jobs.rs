//! Operator endpoints for starting, resetting and removing jobs.
//!
//! Builds are started by webhooks only; test and coverage runs are started
//! here. Each endpoint persists or updates the record first and then
//! publishes the notification for the family's worker, exactly like the
//! webhook path.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};

use super::AppState;
use crate::pubsub::{Action, Notification, PubSubError, Publisher};
use crate::scheduler::{SchedulerError, reset_and_requeue};
use crate::store::{EntityStore, StoreError, records};
use crate::types::{ComponentRef, CoverageRun, JobId, JobStatus, TestRun, TestRunKind};

#[derive(Debug, Error)]
pub enum JobsError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("job not found: {0}")]
    NotFound(JobId),

    #[error("job {0} is running")]
    Running(JobId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("notification failed: {0}")]
    Notify(#[from] PubSubError),
}

impl From<SchedulerError> for JobsError {
    fn from(e: SchedulerError) -> Self {
        match e {
            SchedulerError::Store(e) => JobsError::Store(e),
            SchedulerError::Notify(e) => JobsError::Notify(e),
            other => JobsError::InvalidRequest(other.to_string()),
        }
    }
}

impl IntoResponse for JobsError {
    fn into_response(self) -> Response {
        let status = match &self {
            JobsError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            JobsError::NotFound(_) => StatusCode::NOT_FOUND,
            JobsError::Running(_) => StatusCode::CONFLICT,
            JobsError::Store(_) | JobsError::Notify(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Body of `POST /api/v1/tests`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTestRun {
    pub kind: TestRunKind,
    pub branch: String,
    /// Scoped package name (`@org/name`); required for bottom-up runs.
    pub target_component: Option<String>,
    #[serde(default)]
    pub include_dev_dependents: bool,
    pub creator: Option<String>,
}

impl NewTestRun {
    fn into_run(self) -> Result<TestRun, JobsError> {
        if self.branch.trim().is_empty() {
            return Err(JobsError::InvalidRequest("branch is required".into()));
        }
        let run = match self.kind {
            TestRunKind::FullCatalog => TestRun::full_catalog(self.branch),
            TestRunKind::BottomUp => {
                let target = self
                    .target_component
                    .as_deref()
                    .and_then(ComponentRef::parse)
                    .ok_or_else(|| {
                        JobsError::InvalidRequest(
                            "bottom-up runs need a targetComponent of the form @org/name".into(),
                        )
                    })?;
                TestRun::bottom_up(&target, self.branch, self.include_dev_dependents)
            }
        };
        Ok(match self.creator {
            Some(creator) => run.with_creator(creator),
            None => run,
        })
    }
}

/// Body of `POST /api/v1/coverage`.
#[derive(Debug, Deserialize)]
pub struct NewCoverageRun {
    /// Scoped package name (`@org/name`).
    pub component: String,
    pub tag: String,
}

fn accepted(id: &JobId) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": id })),
    )
        .into_response()
}

/// `POST /api/v1/tests`
pub async fn create_test_run<S, P>(
    State(app_state): State<AppState<S, P>>,
    Json(request): Json<NewTestRun>,
) -> Result<Response, JobsError>
where
    S: EntityStore,
    P: Publisher,
{
    let run = request.into_run()?;
    records::insert_test_run(app_state.store(), &run).await?;
    app_state
        .publisher()
        .publish(&Notification::new(Action::RunTest, run.id.clone()))
        .await?;
    info!(run = %run.id, kind = %run.kind, branch = %run.branch, "Test run queued");
    Ok(accepted(&run.id))
}

/// `POST /api/v1/tests/{id}/reset`
pub async fn reset_test_run<S, P>(
    State(app_state): State<AppState<S, P>>,
    Path(id): Path<String>,
) -> Result<Response, JobsError>
where
    S: EntityStore,
    P: Publisher,
{
    let id = JobId::new(id);
    let Some(run) = records::get_test_run(app_state.store(), &id).await? else {
        return Err(JobsError::NotFound(id));
    };
    if run.status == JobStatus::Running {
        return Err(JobsError::Running(id));
    }
    reset_and_requeue(app_state.store(), app_state.publisher(), &id).await?;
    Ok(accepted(&id))
}

/// `POST /api/v1/coverage`
pub async fn create_coverage_run<S, P>(
    State(app_state): State<AppState<S, P>>,
    Json(request): Json<NewCoverageRun>,
) -> Result<Response, JobsError>
where
    S: EntityStore,
    P: Publisher,
{
    let component = ComponentRef::parse(&request.component).ok_or_else(|| {
        JobsError::InvalidRequest("component must be of the form @org/name".into())
    })?;
    if request.tag.trim().is_empty() {
        return Err(JobsError::InvalidRequest("tag is required".into()));
    }

    let run = CoverageRun::new(&component, request.tag);
    records::insert_coverage_run(app_state.store(), &run).await?;
    app_state
        .publisher()
        .publish(&Notification::new(Action::RunCoverage, run.id.clone()))
        .await?;
    info!(run = %run.id, component = %component, tag = %run.tag, "Coverage run queued");
    Ok(accepted(&run.id))
}

/// `DELETE /api/v1/builds/{id}`
pub async fn remove_build<S, P>(
    State(app_state): State<AppState<S, P>>,
    Path(id): Path<String>,
) -> Result<Response, JobsError>
where
    S: EntityStore,
    P: Publisher,
{
    remove_job(&app_state, Action::RemoveBuild, JobId::new(id)).await
}

/// `DELETE /api/v1/tests/{id}`
pub async fn remove_test_run<S, P>(
    State(app_state): State<AppState<S, P>>,
    Path(id): Path<String>,
) -> Result<Response, JobsError>
where
    S: EntityStore,
    P: Publisher,
{
    remove_job(&app_state, Action::RemoveTest, JobId::new(id)).await
}

/// `DELETE /api/v1/coverage/{id}`
pub async fn remove_coverage_run<S, P>(
    State(app_state): State<AppState<S, P>>,
    Path(id): Path<String>,
) -> Result<Response, JobsError>
where
    S: EntityStore,
    P: Publisher,
{
    remove_job(&app_state, Action::RemoveCoverage, JobId::new(id)).await
}

/// Publishes a removal action. The queue cancels the job if it is pending or
/// running; the record itself is left in place.
async fn remove_job<S, P>(
    app_state: &AppState<S, P>,
    action: Action,
    id: JobId,
) -> Result<Response, JobsError>
where
    S: EntityStore,
    P: Publisher,
{
    app_state
        .publisher()
        .publish(&Notification::new(action, id.clone()))
        .await
        .inspect_err(|e| warn!(job = %id, error = %e, "Failed to publish removal"))?;
    info!(job = %id, topic = %action.topic(), "Job removal requested");
    Ok(accepted(&id))
}
