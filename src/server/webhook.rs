//! Webhook endpoint handler.
//!
//! Accepts GitHub webhook deliveries, validates signatures, and turns the
//! events that start builds into a persisted [`BuildJob`](crate::types::BuildJob)
//! plus a `process-build` notification. The build itself runs asynchronously
//! in the build worker.

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::pubsub::{Action, Notification, PubSubError, Publisher};
use crate::store::{EntityStore, StoreError, records};
use crate::webhooks::{
    GitHubEvent, HEADER_SIGNATURE_SHA1, HEADER_SIGNATURE_SHA256, ParseError, build_for_event,
    parse_webhook, verify_delivery,
};

/// Header name for GitHub event type.
const HEADER_EVENT: &str = "x-github-event";
/// Header name for GitHub delivery ID.
const HEADER_DELIVERY: &str = "x-github-delivery";

/// Errors that can occur when processing a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    #[error("invalid signature")]
    InvalidSignature,

    /// The payload of a handled event type did not parse.
    #[error("invalid payload: {0}")]
    InvalidPayload(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The build was recorded but its worker could not be notified.
    #[error("notification failed: {0}")]
    Notify(#[from] PubSubError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::InvalidSignature => StatusCode::UNAUTHORIZED,
            WebhookError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            WebhookError::Store(_) | WebhookError::Notify(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-GitHub-Event`: Event type (`status`, `push`, `ping`, ...)
///   - `X-Hub-Signature` (`sha1=<hex>`) and/or `X-Hub-Signature-256`
///     (`sha256=<hex>`): HMAC of the raw body
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 202 Accepted: `{"id": ...}` of the queued build, or an ignored event
/// - 200 OK: `ping`
/// - 400 Bad Request: Missing header or malformed payload
/// - 401 Unauthorized: Missing or invalid signature
/// - 500 Internal Server Error: Store or notification failure
pub async fn webhook_handler<S, P>(
    State(app_state): State<AppState<S, P>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, WebhookError>
where
    S: EntityStore,
    P: Publisher,
{
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery = optional_header(&headers, HEADER_DELIVERY).unwrap_or_default();

    debug!(delivery = %delivery, event_type = %event_type, "Received webhook");

    // Verify signature BEFORE any parsing or I/O.
    if !verify_delivery(
        &body,
        optional_header(&headers, HEADER_SIGNATURE_SHA1).as_deref(),
        optional_header(&headers, HEADER_SIGNATURE_SHA256).as_deref(),
        app_state.webhook_secret(),
    ) {
        warn!(delivery = %delivery, "Invalid webhook signature");
        return Err(WebhookError::InvalidSignature);
    }

    let event = match parse_webhook(&event_type, &body) {
        Ok(Some(event)) => event,
        Ok(None) => {
            debug!(delivery = %delivery, event_type = %event_type, "Ignoring event type");
            return Ok((StatusCode::ACCEPTED, "Ignored").into_response());
        }
        Err(e) => {
            warn!(delivery = %delivery, error = %e, "Malformed webhook payload");
            return Err(e.into());
        }
    };

    if event == GitHubEvent::Ping {
        info!(delivery = %delivery, "Webhook ping");
        return Ok((StatusCode::OK, "pong").into_response());
    }

    let Some(job) = build_for_event(&event) else {
        debug!(delivery = %delivery, event_type = %event_type, "Event starts no build");
        return Ok((StatusCode::ACCEPTED, "Ignored").into_response());
    };

    records::insert_build(app_state.store(), &job).await?;
    app_state
        .publisher()
        .publish(&Notification::new(Action::ProcessBuild, job.id.clone()))
        .await
        .inspect_err(|e| warn!(build = %job.id, error = %e, "Failed to notify build worker"))?;

    info!(
        delivery = %delivery,
        build = %job.id,
        kind = %job.kind,
        component = %job.component_ref(),
        branch = %job.branch,
        "Build queued"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "id": job.id })),
    )
        .into_response())
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    optional_header(headers, name).ok_or(WebhookError::MissingHeader(name))
}

fn optional_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
