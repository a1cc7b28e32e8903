//! HTTP routes.
//!
//! The telephony provider's webhook layer (outside the core) answers the
//! inbound-call webhook with a connect document pointing at
//! `wss://<PUBLIC_URL>/media-stream`; this router accepts that WebSocket and
//! hands the accepted socket to a bridge instance. `/health` is a liveness
//! probe.

use std::sync::Arc;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::bridge;
use crate::state::AppState;

/// Build the application router.
pub fn create_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/media-stream", get(media_stream_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
}

/// Upgrade the telephony media-stream connection and run a bridge on it.
async fn media_stream_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    tracing::info!("telephony media-stream upgrade requested");
    ws.on_upgrade(move |socket| bridge::run_call(socket, state))
}

async fn health() -> &'static str {
    "ok"
}
