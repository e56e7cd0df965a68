//! Web module for receiving GitHub webhooks.
//!
//! This module provides:
//! - Case-insensitive header access decoupled from the HTTP stack
//! - `X-Hub-Signature` signing and verification
//! - Axum middleware that verifies deliveries before the application router
//!   sees them

pub mod handlers;
pub mod headers;
pub mod signature;

pub use handlers::{
    accepted_response, health, not_found, rejection_response, rejection_status,
    verify_webhook, AppState, HealthResponse, RejectionResponse, ACCEPTED_BODY,
};
pub use headers::{HeaderLookup, HeaderSet, DELIVERY_HEADER, EVENT_HEADER, SIGNATURE_HEADER};
pub use signature::{sign_blob, verify_signature};
