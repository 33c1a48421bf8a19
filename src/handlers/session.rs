use std::sync::Arc;

use axum::{Json, extract::State};
use serde_json::Value;

use crate::errors::AppResult;
use crate::state::AppState;

/// Mint a short-lived client secret.
///
/// The upstream response body is returned unchanged so clients can read the
/// token from whichever field the upstream API uses.
pub async fn create_session(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let body = state.issuer.mint().await?;
    Ok(Json(body))
}
