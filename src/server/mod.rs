//! HTTP server for the CI backend.
//!
//! This module implements the HTTP server that:
//! - Accepts webhooks from GitHub, validates signatures, records the build they
//!   start and notifies the build worker
//! - Lets operators start, reset and remove test and coverage runs
//! - Exposes queue snapshots for observability
//! - Provides health checks for liveness probes
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts GitHub webhook deliveries (returns 202 Accepted)
//! - `POST /api/v1/tests` - Queues a test run
//! - `POST /api/v1/tests/{id}/reset` - Resets a test run and queues it again
//! - `POST /api/v1/coverage` - Queues a coverage run
//! - `DELETE /api/v1/{builds,tests,coverage}/{id}` - Cancels a queued or running job
//! - `GET /api/v1/queues` - Returns the running and pending ids of every queue
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

use crate::pubsub::Publisher;
use crate::store::EntityStore;
use crate::worker::JobQueue;

pub mod health;
pub mod jobs;
pub mod queues;
pub mod webhook;

pub use health::health_handler;
pub use jobs::JobsError;
pub use queues::queues_handler;
pub use webhook::{WebhookError, webhook_handler};

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
pub struct AppState<S, P> {
    inner: Arc<AppStateInner<S, P>>,
}

// Manual impl: cloning shares the inner Arc and must not require `S: Clone`.
impl<S, P> Clone for AppState<S, P> {
    fn clone(&self) -> Self {
        AppState {
            inner: self.inner.clone(),
        }
    }
}

struct AppStateInner<S, P> {
    store: Arc<S>,
    publisher: Arc<P>,

    /// Secret for HMAC webhook signature verification.
    webhook_secret: Vec<u8>,

    /// Queues reported by the observability endpoint.
    queues: Vec<Arc<JobQueue>>,
}

impl<S, P> AppState<S, P>
where
    S: EntityStore,
    P: Publisher,
{
    pub fn new(store: Arc<S>, publisher: Arc<P>, webhook_secret: impl Into<Vec<u8>>) -> Self {
        Self::with_queues(store, publisher, webhook_secret, Vec::new())
    }

    pub fn with_queues(
        store: Arc<S>,
        publisher: Arc<P>,
        webhook_secret: impl Into<Vec<u8>>,
        queues: Vec<Arc<JobQueue>>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                store,
                publisher,
                webhook_secret: webhook_secret.into(),
                queues,
            }),
        }
    }

    pub fn store(&self) -> &S {
        &self.inner.store
    }

    pub fn publisher(&self) -> &P {
        &self.inner.publisher
    }

    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    pub fn queues(&self) -> &[Arc<JobQueue>] {
        &self.inner.queues
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router<S, P>(app_state: AppState<S, P>) -> axum::Router
where
    S: EntityStore,
    P: Publisher,
{
    use axum::routing::{delete, get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler::<S, P>))
        .route("/api/v1/builds/{id}", delete(jobs::remove_build::<S, P>))
        .route("/api/v1/tests", post(jobs::create_test_run::<S, P>))
        .route("/api/v1/tests/{id}", delete(jobs::remove_test_run::<S, P>))
        .route("/api/v1/tests/{id}/reset", post(jobs::reset_test_run::<S, P>))
        .route("/api/v1/coverage", post(jobs::create_coverage_run::<S, P>))
        .route("/api/v1/coverage/{id}", delete(jobs::remove_coverage_run::<S, P>))
        .route("/api/v1/queues", get(queues_handler::<S, P>))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
