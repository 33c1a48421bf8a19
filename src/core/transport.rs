//! Bidirectional message transports.
//!
//! Both ends of the relay (browser-facing and upstream-facing) and the talking
//! client speak WebSocket, but the core only sees `FrameSource` / `FrameSink`
//! pairs carrying text or binary frames. Control frames (ping/pong) are
//! handled by the adapters and never surface here.

use std::time::Duration;

use async_trait::async_trait;
use axum::extract::ws::{Message as AxumMessage, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info};

use crate::core::credential::Credential;
use crate::errors::{SessionStage, VoiceError, VoiceResult};

/// Upper bound on the upstream WebSocket handshake.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// One application-level message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Bytes),
}

impl Frame {
    pub fn len(&self) -> usize {
        match self {
            Frame::Text(text) => text.len(),
            Frame::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receiving half of a transport.
#[async_trait]
pub trait FrameSource: Send {
    /// Next frame, `None` once the peer closed the transport.
    async fn recv(&mut self) -> Option<VoiceResult<Frame>>;
}

/// Sending half of a transport.
#[async_trait]
pub trait FrameSink: Send {
    async fn send(&mut self, frame: Frame) -> VoiceResult<()>;

    /// Close the transport. Closing twice is a no-op.
    async fn close(&mut self) -> VoiceResult<()>;
}

/// An open transport split into its two halves.
pub struct Transport {
    pub source: Box<dyn FrameSource>,
    pub sink: Box<dyn FrameSink>,
}

impl Transport {
    pub fn new(source: impl FrameSource + 'static, sink: impl FrameSink + 'static) -> Self {
        Self {
            source: Box::new(source),
            sink: Box::new(sink),
        }
    }

    pub fn into_parts(self) -> (Box<dyn FrameSource>, Box<dyn FrameSink>) {
        (self.source, self.sink)
    }
}

fn conversing(e: impl std::fmt::Display) -> VoiceError {
    VoiceError::transport(SessionStage::Conversing, e.to_string())
}

// =============================================================================
// Client-side WebSocket (tokio-tungstenite)
// =============================================================================

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct WsClientSource(SplitStream<ClientStream>);

pub struct WsClientSink {
    inner: SplitSink<ClientStream, WsMessage>,
    closed: bool,
}

impl Transport {
    /// Wrap an established client WebSocket.
    pub fn from_client_stream(stream: ClientStream) -> Self {
        let (sink, source) = stream.split();
        Self::new(
            WsClientSource(source),
            WsClientSink {
                inner: sink,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl FrameSource for WsClientSource {
    async fn recv(&mut self) -> Option<VoiceResult<Frame>> {
        loop {
            match self.0.next().await? {
                Ok(WsMessage::Text(text)) => return Some(Ok(Frame::Text(text.as_str().to_owned()))),
                Ok(WsMessage::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                Ok(WsMessage::Close(frame)) => {
                    debug!(?frame, "WebSocket closed by peer");
                    return None;
                }
                Ok(WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Frame(_)) => continue,
                Err(e) => return Some(Err(conversing(e))),
            }
        }
    }
}

#[async_trait]
impl FrameSink for WsClientSink {
    async fn send(&mut self, frame: Frame) -> VoiceResult<()> {
        let message = match frame {
            Frame::Text(text) => WsMessage::Text(text.into()),
            Frame::Binary(data) => WsMessage::Binary(data),
        };
        self.inner.send(message).await.map_err(conversing)
    }

    async fn close(&mut self) -> VoiceResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await.map_err(conversing)
    }
}

// =============================================================================
// Server-side WebSocket (axum)
// =============================================================================

pub struct AxumSource(SplitStream<WebSocket>);

pub struct AxumSink {
    inner: SplitSink<WebSocket, AxumMessage>,
    closed: bool,
}

impl Transport {
    /// Wrap an upgraded browser-facing socket.
    pub fn from_axum(socket: WebSocket) -> Self {
        let (sink, source) = socket.split();
        Self::new(
            AxumSource(source),
            AxumSink {
                inner: sink,
                closed: false,
            },
        )
    }
}

#[async_trait]
impl FrameSource for AxumSource {
    async fn recv(&mut self) -> Option<VoiceResult<Frame>> {
        loop {
            match self.0.next().await? {
                Ok(AxumMessage::Text(text)) => {
                    return Some(Ok(Frame::Text(text.as_str().to_owned())));
                }
                Ok(AxumMessage::Binary(data)) => return Some(Ok(Frame::Binary(data))),
                Ok(AxumMessage::Close(frame)) => {
                    debug!(?frame, "Downstream closed");
                    return None;
                }
                Ok(AxumMessage::Ping(_) | AxumMessage::Pong(_)) => continue,
                Err(e) => return Some(Err(conversing(e))),
            }
        }
    }
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send(&mut self, frame: Frame) -> VoiceResult<()> {
        let message = match frame {
            Frame::Text(text) => AxumMessage::Text(text.into()),
            Frame::Binary(data) => AxumMessage::Binary(data),
        };
        self.inner.send(message).await.map_err(conversing)
    }

    async fn close(&mut self) -> VoiceResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.close().await.map_err(conversing)
    }
}

// =============================================================================
// In-memory transport
// =============================================================================

pub struct MemorySource(mpsc::Receiver<Frame>);

pub struct MemorySink(Option<mpsc::Sender<Frame>>);

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Option<VoiceResult<Frame>> {
        self.0.recv().await.map(Ok)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send(&mut self, frame: Frame) -> VoiceResult<()> {
        let tx = self
            .0
            .as_ref()
            .ok_or_else(|| conversing("transport closed"))?;
        tx.send(frame).await.map_err(|_| conversing("peer dropped"))
    }

    async fn close(&mut self) -> VoiceResult<()> {
        self.0.take();
        Ok(())
    }
}

/// Two connected in-memory transports: frames sent on one arrive on the other.
/// Closing a sink ends the opposite source.
pub fn memory_pair(capacity: usize) -> (Transport, Transport) {
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);
    (
        Transport::new(MemorySource(b_rx), MemorySink(Some(a_tx))),
        Transport::new(MemorySource(a_rx), MemorySink(Some(b_tx))),
    )
}

// =============================================================================
// Upstream connector
// =============================================================================

/// Opens the upstream transport with a credential.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, credential: Credential) -> VoiceResult<Transport>;
}

/// Connects to the upstream realtime WebSocket with a bearer credential.
pub struct WebSocketConnector {
    url: String,
    timeout: Duration,
}

impl WebSocketConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, credential: Credential) -> VoiceResult<Transport> {
        let connect_err = |msg: String| VoiceError::transport(SessionStage::Connect, msg);

        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(format!("invalid upstream URL: {e}")))?;

        let auth = HeaderValue::from_str(&credential.bearer())
            .map_err(|_| connect_err("credential is not a valid header value".to_string()))?;
        request.headers_mut().insert("Authorization", auth);
        drop(credential);

        let (stream, response) = tokio::time::timeout(self.timeout, connect_async(request))
            .await
            .map_err(|_| connect_err(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| connect_err(e.to_string()))?;

        info!(url = %self.url, status = %response.status(), "Connected to upstream");
        Ok(Transport::from_client_stream(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_pair_carries_both_kinds() {
        let (mut a, mut b) = memory_pair(8);

        a.sink.send(Frame::Text("hello".into())).await.unwrap();
        a.sink
            .send(Frame::Binary(Bytes::from_static(&[1, 2, 3])))
            .await
            .unwrap();

        assert_eq!(b.source.recv().await.unwrap().unwrap(), Frame::Text("hello".into()));
        assert_eq!(
            b.source.recv().await.unwrap().unwrap(),
            Frame::Binary(Bytes::from_static(&[1, 2, 3]))
        );
    }

    #[tokio::test]
    async fn test_memory_close_ends_peer_source() {
        let (mut a, mut b) = memory_pair(8);
        a.sink.close().await.unwrap();
        a.sink.close().await.unwrap();
        assert!(b.source.recv().await.is_none());
        assert!(a.sink.send(Frame::Text("late".into())).await.is_err());
    }

    #[test]
    fn test_frame_len() {
        assert_eq!(Frame::Text("abc".into()).len(), 3);
        assert!(Frame::Binary(Bytes::new()).is_empty());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connect_stage() {
        let connector = WebSocketConnector::new("ws://127.0.0.1:1/realtime")
            .with_timeout(Duration::from_secs(2));
        let err = connector
            .connect(Credential::static_secret("k"))
            .await
            .err()
            .unwrap();
        assert!(matches!(
            err,
            VoiceError::Transport {
                stage: SessionStage::Connect,
                ..
            }
        ));
    }
}
