//! Realtime conversation protocol.
//!
//! - `messages`: wire shapes of the client events and relay notices
//! - `session`: voice presets, `SessionConfig`, and the `session.update`
//!   handshake
//! - `codec`: base64 audio framing and inbound event classification
//!
//! # Audio Format
//!
//! PCM 16-bit signed little-endian, mono, 24kHz by default.
//!
//! # Example
//!
//! ```rust,ignore
//! use voice_relay::core::realtime::{FrameCodec, ProtocolEvent, SessionNegotiator};
//!
//! let negotiator = SessionNegotiator::default();
//! let config = negotiator.build_config("Ara", "You are terse.", &[])?;
//! negotiator.send(upstream.sink.as_mut(), &config).await?;
//!
//! upstream.sink.send(FrameCodec::audio_append(&pcm).to_frame()?).await?;
//!
//! if let ProtocolEvent::ResponseAudioDelta { delta } = FrameCodec::classify(&text)? {
//!     playback.write_chunk(&FrameCodec::decode_audio(&delta)?)?;
//! }
//! ```

mod codec;
mod messages;
mod session;

pub use codec::{FrameCodec, ProtocolEvent};
pub use messages::{
    AudioDirectionPayload, AudioFormatPayload, AudioPayload, ClientEvent, ContentPart,
    ConversationItem, ErrorBody, RelayHello, RelayNotice, SessionPayload, TurnDetectionPayload,
};
pub use session::{
    AudioFormat, DEFAULT_INSTRUCTIONS, Modality, PersonaProfile, ProfileLookup, SessionConfig,
    SessionNegotiator, TurnDetectionMode, Voice, compose_instructions,
};
