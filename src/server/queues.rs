//! Queue inspection endpoint for observability.
//!
//! Provides a read-only view of what each job family is running and what is
//! waiting behind it.

use axum::Json;
use axum::extract::State;
use serde::Serialize;

use super::AppState;
use crate::pubsub::Publisher;
use crate::store::EntityStore;
use crate::worker::QueueSnapshot;

#[derive(Debug, Serialize)]
pub struct QueuesResponse {
    pub queues: Vec<NamedSnapshot>,
}

#[derive(Debug, Serialize)]
pub struct NamedSnapshot {
    pub name: &'static str,
    #[serde(flatten)]
    pub snapshot: QueueSnapshot,
}

/// Queue inspection handler.
///
/// Returns one entry per queue: its name, the running id (or `null`) and the
/// pending ids in run order.
pub async fn queues_handler<S, P>(State(app_state): State<AppState<S, P>>) -> Json<QueuesResponse>
where
    S: EntityStore,
    P: Publisher,
{
    let queues = app_state
        .queues()
        .iter()
        .map(|q| NamedSnapshot {
            name: q.name(),
            snapshot: q.snapshot(),
        })
        .collect();
    Json(QueuesResponse { queues })
}
