//! End-to-end talking participant.
//!
//! A session walks `Unauthenticated → Connecting → AwaitingAck → Conversing →
//! Closed`. Device I/O runs on blocking workers; the network side is a send
//! loop (captured audio and typed turns) and a receive loop (classified
//! events, audio to playback) joined in the session task. When either loop
//! stops the other is cancelled, the workers are joined, and both device
//! handles are released before `run` returns.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::audio::{AudioDevice, CaptureHandle, PlaybackHandle, DEFAULT_CHUNK_FRAMES};
use crate::core::credential::CredentialSource;
use crate::core::realtime::{
    ClientEvent, ConversationItem, FrameCodec, ProtocolEvent, SessionConfig, SessionNegotiator,
    TurnDetectionMode,
};
use crate::core::transport::{Connector, Frame, FrameSink, FrameSource};
use crate::errors::{VoiceError, VoiceResult};

/// Decoded audio chunks queued ahead of the speaker.
const PLAYBACK_QUEUE: usize = 32;

/// Protocol state of a client session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Unauthenticated,
    Connecting,
    AwaitingAck,
    Conversing,
    Closed,
}

/// Receives conversation events as they arrive. All methods default to no-ops.
pub trait ConversationListener: Send + Sync {
    fn on_state(&self, _state: ClientState) {}

    /// Assistant text or transcript fragment
    fn on_text_delta(&self, _delta: &str) {}

    /// Transcription of the user's own speech
    fn on_user_transcript(&self, _text: &str) {}

    fn on_turn_started(&self) {}

    /// Assistant turn finished; `text` is the turn's accumulated text
    fn on_turn_done(&self, _text: &str) {}

    /// Error event from the upstream endpoint (non-fatal)
    fn on_error(&self, _message: &str) {}
}

/// Listener that ignores everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentListener;

impl ConversationListener for SilentListener {}

/// What happened during a session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSummary {
    /// `input_audio_buffer.append` events sent
    pub frames_sent: u64,
    /// Typed user turns sent
    pub text_turns_sent: u64,
    /// Spoken turns ended by an explicit commit
    pub audio_turns_committed: u64,
    pub audio_bytes_played: u64,
    pub turns_completed: u64,
    /// Assistant text, one line per completed turn
    pub transcript: String,
    /// Error events reported by the upstream endpoint
    pub errors: Vec<String>,
    /// Inbound messages skipped as malformed
    pub malformed_events: u64,
}

#[derive(Default)]
struct SendStats {
    frames_sent: u64,
    text_turns_sent: u64,
    audio_turns_committed: u64,
}

#[derive(Default)]
struct ReceiveStats {
    audio_bytes_played: u64,
    turns_completed: u64,
    transcript: String,
    current_turn: String,
    errors: Vec<String>,
    malformed_events: u64,
}

pub struct StreamingVoiceClient {
    credentials: Arc<dyn CredentialSource>,
    connector: Arc<dyn Connector>,
    device: Arc<dyn AudioDevice>,
    negotiator: SessionNegotiator,
    session: SessionConfig,
    chunk_frames: usize,
    listener: Arc<dyn ConversationListener>,
    text_input: Option<mpsc::Receiver<String>>,
    turn_signals: Option<mpsc::Receiver<()>>,
    state: watch::Sender<ClientState>,
    cancel: CancellationToken,
}

impl StreamingVoiceClient {
    pub fn new(
        credentials: Arc<dyn CredentialSource>,
        connector: Arc<dyn Connector>,
        device: Arc<dyn AudioDevice>,
        negotiator: SessionNegotiator,
        session: SessionConfig,
    ) -> Self {
        Self {
            credentials,
            connector,
            device,
            negotiator,
            session,
            chunk_frames: DEFAULT_CHUNK_FRAMES,
            listener: Arc::new(SilentListener),
            text_input: None,
            turn_signals: None,
            state: watch::Sender::new(ClientState::Unauthenticated),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_chunk_frames(mut self, frames: usize) -> Self {
        self.chunk_frames = frames.max(1);
        self
    }

    pub fn with_listener(mut self, listener: Arc<dyn ConversationListener>) -> Self {
        self.listener = listener;
        self
    }

    /// Lines received here are sent as typed user turns.
    pub fn with_text_input(mut self, input: mpsc::Receiver<String>) -> Self {
        self.text_input = Some(input);
        self
    }

    /// Each signal ends the user's spoken turn: the buffered audio is
    /// committed and a response requested. Needed with
    /// `TurnDetectionMode::Manual`, where the endpoint never ends turns itself.
    pub fn with_turn_signals(mut self, signals: mpsc::Receiver<()>) -> Self {
        self.turn_signals = Some(signals);
        self
    }

    pub fn state(&self) -> ClientState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ClientState> {
        self.state.subscribe()
    }

    /// Cancelling this token ends the session as if the transport closed.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn set_state(&self, state: ClientState) {
        self.state.send_replace(state);
        debug!(?state, "Client state");
        self.listener.on_state(state);
    }

    /// Run one session to completion.
    ///
    /// Returns the summary when the session ends by transport closure or
    /// shutdown. Setup failures (devices, credential, connect, negotiate) and
    /// mid-session transport or device failures are returned as errors.
    pub async fn run(mut self) -> VoiceResult<SessionSummary> {
        let result = self.run_session().await;
        self.set_state(ClientState::Closed);
        result
    }

    async fn run_session(&mut self) -> VoiceResult<SessionSummary> {
        let spec = self.negotiator.audio_spec();
        let chunk_bytes = self.chunk_frames * spec.frame_bytes();

        let capture = self.device.open_capture(&spec)?;
        let playback = self.device.open_playback(&spec)?;

        self.set_state(ClientState::Connecting);
        let credential = self.credentials.acquire().await?;
        let transport = self.connector.connect(credential).await?;
        let (source, mut sink) = transport.into_parts();

        self.set_state(ClientState::AwaitingAck);
        if let Err(e) = self.negotiator.send(sink.as_mut(), &self.session).await {
            let _ = sink.close().await;
            return Err(e);
        }

        self.set_state(ClientState::Conversing);
        info!(voice = %self.session.voice, chunk_bytes, "Conversation started");

        let stop_capture = Arc::new(AtomicBool::new(false));
        let (chunk_tx, chunk_rx) = mpsc::channel::<Vec<u8>>(1);
        let capture_worker = {
            let stop = stop_capture.clone();
            tokio::task::spawn_blocking(move || capture_loop(capture, chunk_bytes, chunk_tx, stop))
        };

        let (play_tx, play_rx) = mpsc::channel::<Vec<u8>>(PLAYBACK_QUEUE);
        let playback_worker = tokio::task::spawn_blocking(move || playback_loop(playback, play_rx));

        let inputs = Inputs {
            text: self.text_input.take(),
            turns: self.turn_signals.take(),
        };
        if inputs.turns.is_none() && self.session.turn_detection == TurnDetectionMode::Manual {
            warn!("Manual turn detection without turn signals; no response will be requested");
        }
        let cancel = self.cancel.clone();
        let listener = self.listener.clone();

        let (sent, received) = tokio::join!(
            async {
                let r = send_loop(sink, chunk_rx, inputs, &cancel).await;
                cancel.cancel();
                r
            },
            async {
                let r = receive_loop(source, play_tx, listener.as_ref(), &cancel).await;
                cancel.cancel();
                r
            },
        );

        stop_capture.store(true, Ordering::SeqCst);
        let captured = join_worker(capture_worker, "capture").await;
        let played = join_worker(playback_worker, "playback").await;

        let send_stats = sent?;
        let receive_stats = received?;
        captured?;
        played?;

        let summary = SessionSummary {
            frames_sent: send_stats.frames_sent,
            text_turns_sent: send_stats.text_turns_sent,
            audio_turns_committed: send_stats.audio_turns_committed,
            audio_bytes_played: receive_stats.audio_bytes_played,
            turns_completed: receive_stats.turns_completed,
            transcript: receive_stats.transcript,
            errors: receive_stats.errors,
            malformed_events: receive_stats.malformed_events,
        };
        info!(
            frames_sent = summary.frames_sent,
            turns = summary.turns_completed,
            played = summary.audio_bytes_played,
            "Conversation ended"
        );
        Ok(summary)
    }
}

fn capture_loop(
    mut capture: Box<dyn CaptureHandle>,
    chunk_bytes: usize,
    chunks: mpsc::Sender<Vec<u8>>,
    stop: Arc<AtomicBool>,
) -> VoiceResult<()> {
    while !stop.load(Ordering::SeqCst) {
        let chunk = capture.read_chunk(chunk_bytes)?;
        if chunk.is_empty() {
            continue;
        }
        if chunks.blocking_send(chunk).is_err() {
            break;
        }
    }
    Ok(())
}

fn playback_loop(
    mut playback: Box<dyn PlaybackHandle>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
) -> VoiceResult<()> {
    while let Some(chunk) = chunks.blocking_recv() {
        playback.write_chunk(&chunk)?;
    }
    Ok(())
}

async fn join_worker(handle: JoinHandle<VoiceResult<()>>, name: &str) -> VoiceResult<()> {
    match handle.await {
        Ok(result) => result,
        Err(e) => Err(VoiceError::Device(format!("{name} worker failed: {e}"))),
    }
}

/// Optional user-driven inputs of the send loop.
struct Inputs {
    text: Option<mpsc::Receiver<String>>,
    turns: Option<mpsc::Receiver<()>>,
}

async fn next_input<T>(input: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match input {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn send_loop(
    mut sink: Box<dyn FrameSink>,
    mut chunks: mpsc::Receiver<Vec<u8>>,
    mut inputs: Inputs,
    cancel: &CancellationToken,
) -> VoiceResult<SendStats> {
    let mut stats = SendStats::default();

    let result: VoiceResult<()> = async {
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = chunks.recv() => match chunk {
                    Some(chunk) => {
                        sink.send(FrameCodec::audio_append(&chunk).to_frame()?).await?;
                        stats.frames_sent += 1;
                    }
                    None => {
                        debug!("Capture stopped");
                        break;
                    }
                },
                line = next_input(&mut inputs.text) => match line {
                    Some(text) => {
                        let item = ClientEvent::ConversationItemCreate {
                            item: ConversationItem::user_text(text),
                        };
                        sink.send(item.to_frame()?).await?;
                        sink.send(ClientEvent::ResponseCreate.to_frame()?).await?;
                        stats.text_turns_sent += 1;
                    }
                    None => inputs.text = None,
                },
                signal = next_input(&mut inputs.turns) => match signal {
                    Some(()) => {
                        sink.send(ClientEvent::InputAudioBufferCommit.to_frame()?).await?;
                        sink.send(ClientEvent::ResponseCreate.to_frame()?).await?;
                        stats.audio_turns_committed += 1;
                    }
                    None => inputs.turns = None,
                },
            }
            tokio::task::yield_now().await;
        }
        Ok(())
    }
    .await;

    if let Err(e) = sink.close().await {
        debug!(error = %e, "Closing upstream failed");
    }
    result.map(|_| stats)
}

async fn receive_loop(
    mut source: Box<dyn FrameSource>,
    playback: mpsc::Sender<Vec<u8>>,
    listener: &dyn ConversationListener,
    cancel: &CancellationToken,
) -> VoiceResult<ReceiveStats> {
    let mut stats = ReceiveStats::default();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = source.recv() => next,
        };

        let text = match next {
            None => {
                info!("Upstream closed the session");
                break;
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(Frame::Binary(data))) => {
                play(&playback, data.to_vec(), &mut stats, cancel).await?;
                continue;
            }
            Some(Ok(Frame::Text(text))) => text,
        };

        let event = match FrameCodec::classify(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping inbound event");
                stats.malformed_events += 1;
                continue;
            }
        };

        match event {
            ProtocolEvent::ResponseAudioDelta { delta } => match FrameCodec::decode_audio(&delta) {
                Ok(audio) => play(&playback, audio, &mut stats, cancel).await?,
                Err(e) => {
                    warn!(error = %e, "Skipping audio delta");
                    stats.malformed_events += 1;
                }
            },
            ProtocolEvent::ResponseTextDelta { delta } => {
                stats.current_turn.push_str(&delta);
                listener.on_text_delta(&delta);
            }
            ProtocolEvent::ResponseCreated => listener.on_turn_started(),
            ProtocolEvent::ResponseDone => {
                stats.turns_completed += 1;
                let turn = std::mem::take(&mut stats.current_turn);
                listener.on_turn_done(&turn);
                if !turn.is_empty() {
                    stats.transcript.push_str(&turn);
                    stats.transcript.push('\n');
                }
            }
            ProtocolEvent::InputTranscript { text } => listener.on_user_transcript(&text),
            ProtocolEvent::Error { message } => {
                warn!(%message, "Upstream reported an error");
                listener.on_error(&message);
                stats.errors.push(message);
            }
            ProtocolEvent::ServerLog { message } => info!(%message, "Server log"),
            other => debug!(kind = other.kind(), "Ignoring event"),
        }
    }

    Ok(stats)
}

async fn play(
    playback: &mpsc::Sender<Vec<u8>>,
    audio: Vec<u8>,
    stats: &mut ReceiveStats,
    cancel: &CancellationToken,
) -> VoiceResult<()> {
    if audio.is_empty() {
        return Ok(());
    }
    let len = audio.len() as u64;
    let sent = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Ok(()),
        sent = playback.send(audio) => sent,
    };
    sent.map_err(|_| VoiceError::Device("playback stopped".to_string()))?;
    stats.audio_bytes_played += len;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::audio::MemoryAudioDevice;
    use crate::core::credential::{Credential, StaticCredential};
    use crate::core::transport::{Transport, memory_pair};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct OnceConnector {
        transport: Mutex<Option<Transport>>,
        attempts: AtomicUsize,
    }

    impl OnceConnector {
        fn new(transport: Transport) -> Self {
            Self {
                transport: Mutex::new(Some(transport)),
                attempts: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Connector for OnceConnector {
        async fn connect(&self, _credential: Credential) -> VoiceResult<Transport> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            self.transport
                .lock()
                .take()
                .ok_or_else(|| VoiceError::Configuration("already connected".into()))
        }
    }

    fn client(
        device: &MemoryAudioDevice,
        connector: Arc<OnceConnector>,
    ) -> StreamingVoiceClient {
        let negotiator = SessionNegotiator::default();
        let session = negotiator.build_config("Ara", "You are terse.", &[]).unwrap();
        StreamingVoiceClient::new(
            Arc::new(StaticCredential::new("k")),
            connector,
            Arc::new(device.clone()),
            negotiator,
            session,
        )
        .with_chunk_frames(2)
    }

    #[tokio::test]
    async fn test_device_failure_before_connect() {
        let (local, _remote) = memory_pair(4);
        let connector = Arc::new(OnceConnector::new(local));
        let device = MemoryAudioDevice::new();
        device.fail_open("no microphone");

        let err = client(&device, connector.clone()).run().await.unwrap_err();
        assert!(matches!(err, VoiceError::Device(_)));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_releases_devices() {
        let (local, mut remote) = memory_pair(16);
        let connector = Arc::new(OnceConnector::new(local));
        let device = MemoryAudioDevice::new();

        let client = client(&device, connector);
        let mut state = client.subscribe();
        let shutdown = client.shutdown_handle();
        let task = tokio::spawn(client.run());

        state
            .wait_for(|s| *s == ClientState::Conversing)
            .await
            .unwrap();
        let first = remote.source.recv().await.unwrap().unwrap();
        assert!(matches!(first, Frame::Text(ref t) if t.contains("session.update")));

        shutdown.cancel();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.frames_sent, 0);

        let stats = device.stats();
        assert_eq!(stats.capture_released, 1);
        assert_eq!(stats.playback_released, 1);
        assert_eq!(*state.borrow(), ClientState::Closed);
    }

    #[tokio::test]
    async fn test_text_turn_sends_item_then_response() {
        let (local, mut remote) = memory_pair(16);
        let connector = Arc::new(OnceConnector::new(local));
        let device = MemoryAudioDevice::new();
        let (text_tx, text_rx) = mpsc::channel(4);

        let task = tokio::spawn(client(&device, connector).with_text_input(text_rx).run());

        let _session = remote.source.recv().await.unwrap().unwrap();
        text_tx.send("hello".to_string()).await.unwrap();

        let Frame::Text(item) = remote.source.recv().await.unwrap().unwrap() else {
            panic!("expected text");
        };
        assert!(item.contains("conversation.item.create"));
        assert!(item.contains("hello"));
        let Frame::Text(create) = remote.source.recv().await.unwrap().unwrap() else {
            panic!("expected text");
        };
        assert!(create.contains("response.create"));

        remote.sink.close().await.unwrap();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.text_turns_sent, 1);
    }
    #[tokio::test]
    async fn test_manual_turn_commits_then_requests_response() {
        let (local, mut remote) = memory_pair(16);
        let connector = Arc::new(OnceConnector::new(local));
        let device = MemoryAudioDevice::new();
        let negotiator = SessionNegotiator::default().with_turn_detection(TurnDetectionMode::Manual);
        let session = negotiator.build_config("Rex", "You are terse.", &[]).unwrap();
        let (turn_tx, turn_rx) = mpsc::channel(1);

        let client = StreamingVoiceClient::new(
            Arc::new(StaticCredential::new("k")),
            connector,
            Arc::new(device.clone()),
            negotiator,
            session,
        )
        .with_turn_signals(turn_rx);
        let task = tokio::spawn(client.run());

        let Frame::Text(update) = remote.source.recv().await.unwrap().unwrap() else {
            panic!("expected text");
        };
        let update: serde_json::Value = serde_json::from_str(&update).unwrap();
        assert!(update["session"]["turn_detection"].is_null());

        turn_tx.send(()).await.unwrap();
        let mut kinds = Vec::new();
        while kinds.len() < 2 {
            let Frame::Text(text) = remote.source.recv().await.unwrap().unwrap() else {
                panic!("expected text");
            };
            let event: serde_json::Value = serde_json::from_str(&text).unwrap();
            kinds.push(event["type"].as_str().unwrap().to_string());
        }
        assert_eq!(kinds, ["input_audio_buffer.commit", "response.create"]);

        remote.sink.close().await.unwrap();
        let summary = task.await.unwrap().unwrap();
        assert_eq!(summary.audio_turns_committed, 1);
    }

    /// Playback that blocks until the gate opens; capture that stays silent.
    #[derive(Clone, Default)]
    struct GatedDevice {
        gate: Arc<(Mutex<bool>, parking_lot::Condvar)>,
    }

    impl GatedDevice {
        fn open_gate(&self) {
            *self.gate.0.lock() = true;
            self.gate.1.notify_all();
        }
    }

    struct SilentCapture;

    impl CaptureHandle for SilentCapture {
        fn read_chunk(&mut self, _size: usize) -> VoiceResult<Vec<u8>> {
            std::thread::sleep(std::time::Duration::from_millis(5));
            Ok(Vec::new())
        }
    }

    struct GatedPlayback(Arc<(Mutex<bool>, parking_lot::Condvar)>);

    impl PlaybackHandle for GatedPlayback {
        fn write_chunk(&mut self, _data: &[u8]) -> VoiceResult<()> {
            let mut open = self.0.0.lock();
            while !*open {
                self.0.1.wait(&mut open);
            }
            Ok(())
        }
    }

    impl AudioDevice for GatedDevice {
        fn open_capture(&self, _spec: &crate::core::audio::AudioSpec) -> VoiceResult<Box<dyn CaptureHandle>> {
            Ok(Box::new(SilentCapture))
        }

        fn open_playback(&self, _spec: &crate::core::audio::AudioSpec) -> VoiceResult<Box<dyn PlaybackHandle>> {
            Ok(Box::new(GatedPlayback(self.gate.clone())))
        }
    }

    #[tokio::test]
    async fn test_cancel_reaches_receive_loop_with_stalled_playback() {
        let (local, mut remote) = memory_pair(128);
        let connector = Arc::new(OnceConnector::new(local));
        let device = GatedDevice::default();

        let negotiator = SessionNegotiator::default();
        let session = negotiator.build_config("Sal", "", &[]).unwrap();
        let client = StreamingVoiceClient::new(
            Arc::new(StaticCredential::new("k")),
            connector,
            Arc::new(device.clone()),
            negotiator,
            session,
        );
        let shutdown = client.shutdown_handle();
        let task = tokio::spawn(client.run());

        let _update = remote.source.recv().await.unwrap().unwrap();

        // More deltas than the playback queue holds, so the receive loop
        // ends up waiting on a full queue.
        let delta = r#"{"type":"response.audio.delta","delta":"AAAA"}"#;
        for _ in 0..(PLAYBACK_QUEUE + 8) {
            remote.sink.send(Frame::Text(delta.into())).await.unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        shutdown.cancel();

        // The receive loop drops the inbound half once it observes the
        // cancellation, even though playback is still blocked.
        let released = tokio::time::timeout(std::time::Duration::from_secs(2), async {
            loop {
                if remote.sink.send(Frame::Text(delta.into())).await.is_err() {
                    break;
                }
                tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(released.is_ok());

        device.open_gate();
        let summary = task.await.unwrap().unwrap();
        assert!(summary.audio_bytes_played <= 3 * (PLAYBACK_QUEUE as u64 + 1));
    }
}
