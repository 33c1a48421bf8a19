pub mod audio;
pub mod client;
pub mod credential;
pub mod pump;
pub mod realtime;
pub mod relay;
pub mod transport;

// Re-export commonly used types for convenience
pub use audio::{AudioDevice, AudioSpec, CaptureHandle, MemoryAudioDevice, PlaybackHandle};
pub use client::{ClientState, ConversationListener, SessionSummary, StreamingVoiceClient};
pub use credential::{Credential, CredentialProvider, CredentialSource};
pub use pump::{Direction, DuplexPump, FrameObserver, PumpReport, PumpState};
pub use realtime::{FrameCodec, ProtocolEvent, SessionConfig, SessionNegotiator, Voice};
pub use relay::{ConnectionState, RelayConnection, RelayService};
pub use transport::{Connector, Frame, FrameSink, FrameSource, Transport, WebSocketConnector};
