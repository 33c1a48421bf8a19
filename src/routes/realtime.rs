//! Relay WebSocket route configuration

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use crate::handlers::relay_handler;
use crate::state::AppState;
use std::sync::Arc;

/// Create the relay WebSocket router
///
/// # Endpoint
///
/// `GET /ws` - WebSocket upgrade for a relayed conversation
///
/// # Protocol
///
/// The first client message configures the session:
///
/// ```json
/// {"instructions": "You are terse.", "voice": "Ara"}
/// ```
///
/// The relay answers `{"type": "server_log", "message": "Connected to upstream"}`
/// once the upstream session is configured, then forwards every message in
/// both directions unchanged. An invalid voice is answered with
/// `{"type": "error", "error": {"message": "..."}}` and the socket is closed.
pub fn create_realtime_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws", get(relay_handler))
        .layer(TraceLayer::new_for_http())
}
