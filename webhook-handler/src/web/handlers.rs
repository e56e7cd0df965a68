//! HTTP glue around the verifier.
//!
//! [`verify_webhook`] is installed as middleware in front of the application
//! router. It:
//! 1. Passes requests for other paths through untouched
//! 2. Verifies requests on the webhook path
//! 3. Answers `{"ok":true}` and forwards the event on a channel
//!
//! Rejected deliveries get a JSON error body and never reach the channel.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, StatusCode, Uri},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info};

use crate::verify::{
    BodyReadError, IncomingRequest, Outcome, RejectionReason, VerifiedEvent, Verifier,
};

/// Exact body written for accepted deliveries.
pub const ACCEPTED_BODY: &str = r#"{"ok":true}"#;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub verifier: Verifier,
    pub events: mpsc::Sender<VerifiedEvent>,
}

impl AppState {
    pub fn new(verifier: Verifier, events: mpsc::Sender<VerifiedEvent>) -> Self {
        Self { verifier, events }
    }
}

// =============================================================================
// Health Check
// =============================================================================

/// Health check response.
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

/// Health check endpoint.
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

/// Fallback for paths no route claims.
///
/// Registered explicitly so the verification middleware also wraps it.
pub async fn not_found() -> StatusCode {
    StatusCode::NOT_FOUND
}

// =============================================================================
// Responses
// =============================================================================

/// Error body for rejected deliveries.
#[derive(Debug, Serialize)]
pub struct RejectionResponse {
    pub ok: bool,
    pub error: String,
}

/// The `200 {"ok":true}` response written before an event is forwarded.
pub fn accepted_response() -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        ACCEPTED_BODY,
    )
        .into_response()
}

/// HTTP status for a rejection.
pub fn rejection_status(reason: &RejectionReason) -> StatusCode {
    match reason {
        RejectionReason::SignatureMismatch => StatusCode::UNAUTHORIZED,
        RejectionReason::BodyReadFailure(BodyReadError::TooLarge { .. }) => {
            StatusCode::PAYLOAD_TOO_LARGE
        }
        RejectionReason::MissingSignature
        | RejectionReason::MissingEventType
        | RejectionReason::MissingDeliveryId
        | RejectionReason::BodyReadFailure(BodyReadError::Transport(_))
        | RejectionReason::MalformedJson(_) => StatusCode::BAD_REQUEST,
    }
}

/// JSON error response for a rejection.
pub fn rejection_response(reason: &RejectionReason) -> Response {
    (
        rejection_status(reason),
        Json(RejectionResponse {
            ok: false,
            error: reason.to_string(),
        }),
    )
        .into_response()
}

// =============================================================================
// Middleware
// =============================================================================

/// Verify GitHub deliveries on the configured path.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn verify_webhook(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let url = request_target(request.uri()).to_string();
    if !state.verifier.matches_route(&url) {
        return next.run(request).await;
    }

    let (parts, body) = request.into_parts();
    let incoming = IncomingRequest::new(url, parts.headers, Body::into_data_stream(body));

    match state.verifier.verify(incoming).await {
        // Unreachable after matches_route, kept for exhaustiveness
        Outcome::NotMine => StatusCode::NOT_FOUND.into_response(),
        Outcome::Rejected(reason) => rejection_response(&reason),
        Outcome::Accepted(event) => {
            let response = accepted_response();
            forward_event(&state.events, event);
            response
        }
    }
}

/// Path plus query string, as sent in the request line.
fn request_target(uri: &Uri) -> &str {
    uri.path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or_else(|| uri.path())
}

/// Hand an accepted event to the consumer without waiting.
fn forward_event(events: &mpsc::Sender<VerifiedEvent>, event: VerifiedEvent) {
    let delivery_id = event.delivery_id.clone();
    let event_type = event.event_type.clone();

    match events.try_send(event) {
        Ok(()) => {
            info!(
                event_type = %event_type,
                delivery_id = %delivery_id,
                "webhook_event_forwarded"
            );
        }
        Err(TrySendError::Full(_)) => {
            error!(delivery_id = %delivery_id, "webhook_event_channel_full");
        }
        Err(TrySendError::Closed(_)) => {
            error!(delivery_id = %delivery_id, "webhook_event_channel_closed");
        }
    }
}
