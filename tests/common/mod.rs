//! Shared helpers for integration tests: a scripted upstream realtime
//! endpoint and an in-process relay server.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};

use voice_relay::core::credential::{ClientSecretIssuer, StaticCredential};
use voice_relay::core::realtime::SessionNegotiator;
use voice_relay::core::relay::RelayService;
use voice_relay::core::transport::WebSocketConnector;
use voice_relay::{AppState, ServerConfig, Voice, routes};

/// Secret the relay under test presents upstream.
pub const TEST_KEY: &str = "test-key";

/// How the fake upstream endpoint reacts to the events it receives.
#[derive(Debug, Clone)]
pub enum Script {
    /// Answer every audio append with an audio delta carrying the same
    /// payload, followed by `response.done`.
    Echo,
    /// After `session.update`, send these frames and close.
    Reply(Vec<String>),
    /// Close as soon as `session.update` arrives.
    CloseAfterSessionUpdate,
}

/// A single-connection fake of the upstream realtime WebSocket.
pub struct FakeUpstream {
    pub url: String,
    authorization: Arc<Mutex<Option<String>>>,
    connections: Arc<AtomicUsize>,
    task: JoinHandle<Vec<Value>>,
}

impl FakeUpstream {
    pub async fn spawn(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}/v1/realtime", listener.local_addr().unwrap());
        let authorization = Arc::new(Mutex::new(None));
        let connections = Arc::new(AtomicUsize::new(0));

        let task = {
            let authorization = authorization.clone();
            let connections = connections.clone();
            tokio::spawn(async move {
                let (stream, _) = listener.accept().await.unwrap();
                connections.fetch_add(1, Ordering::SeqCst);

                let slot = authorization.clone();
                let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                    *slot.lock() = req
                        .headers()
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_owned);
                    Ok(resp)
                };
                let mut ws = accept_hdr_async(stream, callback).await.unwrap();

                let mut received = Vec::new();
                while let Some(Ok(message)) = ws.next().await {
                    let text = match message {
                        Message::Text(text) => text.as_str().to_owned(),
                        Message::Close(_) => break,
                        _ => continue,
                    };
                    let event: Value = serde_json::from_str(&text).unwrap();
                    let kind = event["type"].as_str().unwrap_or_default().to_owned();
                    received.push(event.clone());

                    match (&script, kind.as_str()) {
                        (Script::Echo, "input_audio_buffer.append") => {
                            let delta = json!({
                                "type": "response.audio.delta",
                                "delta": event["audio"],
                            });
                            let done = json!({ "type": "response.done" });
                            if ws.send(Message::Text(delta.to_string().into())).await.is_err()
                                || ws.send(Message::Text(done.to_string().into())).await.is_err()
                            {
                                break;
                            }
                        }
                        (Script::Reply(frames), "session.update") => {
                            for frame in frames {
                                let _ = ws.send(Message::Text(frame.clone().into())).await;
                            }
                            let _ = ws.close(None).await;
                        }
                        (Script::CloseAfterSessionUpdate, "session.update") => {
                            let _ = ws.close(None).await;
                        }
                        _ => {}
                    }
                }
                received
            })
        };

        Self {
            url,
            authorization,
            connections,
            task,
        }
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn authorization(&self) -> Option<String> {
        self.authorization.lock().clone()
    }

    /// Wait for the connection to end and return every event received.
    pub async fn finish(self) -> Vec<Value> {
        tokio::time::timeout(Duration::from_secs(5), self.task)
            .await
            .expect("upstream did not finish")
            .unwrap()
    }

    pub fn abort(self) {
        self.task.abort();
    }
}

/// Configuration pointing every upstream URL at `upstream_url`.
pub fn test_config(upstream_url: &str, client_secrets_url: &str) -> ServerConfig {
    let mut config = ServerConfig::default();
    config.host = "127.0.0.1".to_string();
    config.port = 0;
    config.upstream_url = upstream_url.to_string();
    config.client_secrets_url = client_secrets_url.to_string();
    config.api_key = Some(TEST_KEY.to_string());
    config.credential_timeout_ms = 2000;
    config
}

/// App state whose relay presents `TEST_KEY` upstream.
pub fn test_state(config: ServerConfig) -> Arc<AppState> {
    let relay = RelayService::new(
        Arc::new(StaticCredential::new(TEST_KEY)),
        Arc::new(WebSocketConnector::new(config.upstream_url.clone()).with_timeout(Duration::from_secs(2))),
        SessionNegotiator::default(),
        Voice::Ara,
    );
    let issuer = ClientSecretIssuer::new(&config);
    AppState::from_parts(config, relay, issuer)
}

/// Serve the application on an ephemeral port and return its address.
pub async fn spawn_app(state: Arc<AppState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = routes::create_app(state);
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr.to_string()
}
