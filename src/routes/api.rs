use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::handlers::{api, session};
use crate::state::AppState;
use std::sync::Arc;

/// Create the HTTP API router
///
/// - `GET /health` - liveness check
/// - `POST /session` - mint a short-lived client secret
pub fn create_api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/health", get(api::health_check))
        .route("/session", post(session::create_session))
        .layer(TraceLayer::new_for_http())
}
