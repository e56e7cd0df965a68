//! Hubhook Web Server - verified GitHub webhook receiver.
//!
//! This binary provides a thin web server that:
//! - Verifies `X-Hub-Signature` on deliveries to the configured path
//! - Answers accepted deliveries with `{"ok":true}`
//! - Hands verified events to a background consumer
//!
//! Requests for any other path fall through to the normal router.

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{middleware, routing::get, Router};
use tokio::{net::TcpListener, signal, sync::mpsc};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use hubhook::web::{health, not_found, verify_webhook, AppState};
use hubhook::{Config, VerifiedEvent, Verifier};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize structured JSON logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().json().flatten_event(true))
        .init();

    info!("web_server_starting");

    // Load configuration; path and secret are required
    let config = Config::from_env().context("Invalid webhook configuration")?;
    info!(
        port = config.port,
        webhook_path = %config.hook.path(),
        max_body_bytes = config.max_body_bytes,
        event_channel_capacity = config.event_channel_capacity,
        "config_loaded"
    );

    let verifier = Verifier::new(config.hook.clone()).with_max_body_bytes(config.max_body_bytes);

    // Verified events are consumed off the request path
    let (tx, rx) = mpsc::channel(config.event_channel_capacity);
    let consumer = tokio::spawn(consume_events(rx));

    let state = AppState::new(verifier, tx);

    // Build the router; the middleware sees every request before routing
    let app = Router::new()
        .route("/health", get(health))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state, verify_webhook))
        .layer(TraceLayer::new_for_http());

    // Bind to address
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind to address")?;

    info!(address = %addr, "web_server_listening");

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    // The router owned the last sender; the consumer drains and exits
    consumer.await.context("Event consumer panicked")?;

    info!("web_server_shutdown_complete");

    Ok(())
}

/// Log each verified event until every sender is dropped.
async fn consume_events(mut rx: mpsc::Receiver<VerifiedEvent>) {
    while let Some(event) = rx.recv().await {
        info!(
            event_type = %event.event_type,
            delivery_id = %event.delivery_id,
            source_url = %event.source_url,
            "webhook_event_received"
        );
    }

    info!("event_consumer_stopped");
}

/// Create a future that completes when a shutdown signal is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }

    info!("web_server_shutting_down");
}
