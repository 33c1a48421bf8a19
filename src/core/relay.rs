//! Pass-through relay for peers that hold no upstream credential.
//!
//! The downstream peer opens a connection and sends a hello carrying its
//! instructions and voice. The relay validates the voice, acquires a
//! credential, connects upstream, sends the session configuration, and then
//! pumps frames verbatim in both directions until either side closes.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{Instrument, Level, debug, info, info_span, warn};
use uuid::Uuid;

use crate::core::credential::CredentialSource;
use crate::core::pump::{Direction, DuplexPump, FrameObserver, PumpReport, PumpState};
use crate::core::realtime::{
    DEFAULT_INSTRUCTIONS, FrameCodec, RelayHello, RelayNotice, SessionConfig, SessionNegotiator,
    Voice,
};
use crate::core::transport::{Connector, Frame, Transport};
use crate::errors::{SessionStage, VoiceError, VoiceResult};

/// Message sent downstream once the upstream session is configured.
pub const CONNECTED_NOTICE: &str = "Connected to upstream";

/// Lifecycle of a relayed connection pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Downstream transport plus the observable state of the pair it becomes.
pub struct RelayConnection {
    downstream: Transport,
    state: watch::Sender<ConnectionState>,
}

impl RelayConnection {
    pub fn new(downstream: Transport) -> Self {
        Self {
            downstream,
            state: watch::Sender::new(ConnectionState::Connecting),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }
}

/// Logs event kind and size of every forwarded frame. Audio payloads and
/// message bodies are never logged.
pub struct RelayObserver;

impl FrameObserver for RelayObserver {
    fn observe(&self, direction: Direction, frame: &Frame) {
        if !tracing::enabled!(Level::DEBUG) {
            return;
        }
        let kind = FrameCodec::frame_kind(frame);
        debug!(%direction, kind = %kind, bytes = frame.len(), "Forwarding");
    }
}

pub struct RelayService {
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    negotiator: SessionNegotiator,
    default_voice: Voice,
}

impl RelayService {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn Connector>,
        negotiator: SessionNegotiator,
        default_voice: Voice,
    ) -> Self {
        Self {
            credentials,
            connector,
            negotiator,
            default_voice,
        }
    }

    /// Relay one downstream connection until either side closes.
    ///
    /// Setup failures are reported downstream as an `error` event before the
    /// downstream is closed; the upstream endpoint is never contacted when
    /// the hello is invalid.
    pub async fn serve(&self, connection: RelayConnection) -> VoiceResult<PumpReport> {
        let session_id = Uuid::new_v4();
        let span = info_span!("relay_session", %session_id);
        self.serve_inner(connection).instrument(span).await
    }

    async fn serve_inner(&self, connection: RelayConnection) -> VoiceResult<PumpReport> {
        let RelayConnection {
            mut downstream,
            state,
        } = connection;
        info!("Downstream connected");

        let upstream = match self.establish(&mut downstream).await {
            Ok(upstream) => upstream,
            Err(e) => {
                warn!(error = %e, "Relay setup failed");
                if let Ok(frame) = RelayNotice::error(e.to_string()).to_frame() {
                    let _ = downstream.sink.send(frame).await;
                }
                let _ = downstream.sink.close().await;
                state.send_replace(ConnectionState::Closed);
                return Err(e);
            }
        };

        let mut upstream = upstream;
        let notice = RelayNotice::server_log(CONNECTED_NOTICE).to_frame()?;
        if let Err(e) = downstream.sink.send(notice).await {
            let _ = upstream.sink.close().await;
            state.send_replace(ConnectionState::Closed);
            return Err(e);
        }

        state.send_replace(ConnectionState::Active);
        info!("Relay active");

        let pump = DuplexPump::new(Arc::new(RelayObserver));
        let mut pump_state = pump.subscribe();
        let closing = async {
            if pump_state
                .wait_for(|s| matches!(s, PumpState::Draining | PumpState::Stopped))
                .await
                .is_ok()
            {
                state.send_replace(ConnectionState::Closing);
            }
        };

        let (report, _) = tokio::join!(pump.run(downstream, upstream), closing);
        state.send_replace(ConnectionState::Closed);

        match report.initiator() {
            Some(side) if side.stop.is_error() => warn!(
                direction = %side.direction,
                stop = ?side.stop,
                up_frames = report.upstream.frames,
                down_frames = report.downstream.frames,
                "Relay closed after transport failure"
            ),
            _ => info!(
                up_frames = report.upstream.frames,
                down_frames = report.downstream.frames,
                "Relay closed"
            ),
        }
        Ok(report)
    }

    /// Read the hello, then credential, connect and negotiate.
    async fn establish(&self, downstream: &mut Transport) -> VoiceResult<Transport> {
        let config = self.read_hello(downstream).await?;

        let credential = self.credentials.acquire().await?;
        let mut upstream = self.connector.connect(credential).await?;

        if let Err(e) = self.negotiator.send(upstream.sink.as_mut(), &config).await {
            let _ = upstream.sink.close().await;
            return Err(e);
        }
        Ok(upstream)
    }

    async fn read_hello(&self, downstream: &mut Transport) -> VoiceResult<SessionConfig> {
        let first = downstream.source.recv().await.ok_or_else(|| {
            VoiceError::transport(SessionStage::Connect, "downstream closed before hello")
        })??;

        let hello: RelayHello = match first {
            Frame::Text(text) => serde_json::from_str(&text)
                .map_err(|e| VoiceError::MalformedEvent(format!("invalid hello: {e}")))?,
            Frame::Binary(_) => {
                return Err(VoiceError::MalformedEvent(
                    "hello must be a text message".to_string(),
                ));
            }
        };

        let voice = hello
            .voice
            .unwrap_or_else(|| self.default_voice.to_string());
        let instructions = hello
            .instructions
            .unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string());

        let config = self.negotiator.build_config(&voice, &instructions, &[])?;
        info!(voice = %config.voice, "Hello received");
        Ok(config)
    }
}
