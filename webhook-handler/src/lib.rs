//! Hubhook - verified GitHub webhook intake.
//!
//! This library authenticates GitHub webhook deliveries against a shared
//! secret and turns them into [`VerifiedEvent`]s. It is used by the
//! `hubhook-web` binary and can be embedded in any axum application.
//!
//! ## Flow
//!
//! ```text
//! Request → route match → headers → body → X-Hub-Signature → JSON → VerifiedEvent
//! ```

pub mod config;
pub mod verify;
pub mod web;

// Re-export commonly used types
pub use config::{Config, ConfigError, HookOptions};
pub use verify::{
    read_body, BodyReadError, IncomingRequest, Outcome, RejectionReason, VerifiedEvent, Verifier,
};
pub use web::AppState;
