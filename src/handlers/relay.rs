//! WebSocket relay handler
//!
//! Each upgraded socket becomes the downstream side of one relayed session.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use tracing::{info, warn};

use crate::core::relay::RelayConnection;
use crate::core::transport::Transport;
use crate::state::AppState;

/// Maximum WebSocket frame size (10 MB)
const MAX_WS_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Maximum WebSocket message size (10 MB)
const MAX_WS_MESSAGE_SIZE: usize = 10 * 1024 * 1024;

pub async fn relay_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    info!("Relay WebSocket upgrade requested");

    ws.max_frame_size(MAX_WS_FRAME_SIZE)
        .max_message_size(MAX_WS_MESSAGE_SIZE)
        .on_upgrade(move |socket| handle_relay_socket(socket, state))
}

async fn handle_relay_socket(socket: WebSocket, state: Arc<AppState>) {
    let connection = RelayConnection::new(Transport::from_axum(socket));
    match state.relay.serve(connection).await {
        Ok(report) => info!(
            up_frames = report.upstream.frames,
            down_frames = report.downstream.frames,
            "Relay session finished"
        ),
        Err(e) => warn!(error = %e, "Relay session failed"),
    }
}
