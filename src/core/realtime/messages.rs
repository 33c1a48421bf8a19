//! Wire shapes of the realtime protocol.
//!
//! Client events (sent upstream):
//! - session.update - Session configuration, sent once before any audio
//! - input_audio_buffer.append - Base64 PCM16 audio chunk
//! - input_audio_buffer.commit - Commit buffered audio (manual turn detection)
//! - conversation.item.create - Typed user turn
//! - response.create - Ask for a response
//!
//! Relay notices (sent downstream by the relay itself):
//! - server_log - Informational message
//! - error - Setup failure reported before the socket closes

use serde::{Deserialize, Serialize};

use crate::core::transport::Frame;
use crate::errors::{VoiceError, VoiceResult};

// =============================================================================
// Session payload
// =============================================================================

/// `session` object of a `session.update` event.
///
/// Carries the audio format both as the flat `input_audio_format` /
/// `output_audio_format` fields and as the nested `audio` block, so either
/// revision of the upstream API accepts it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionPayload {
    pub modalities: Vec<String>,
    pub instructions: String,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    /// `null` disables server-side turn detection
    pub turn_detection: Option<TurnDetectionPayload>,
    pub audio: AudioPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnDetectionPayload {
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioPayload {
    pub input: AudioDirectionPayload,
    pub output: AudioDirectionPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDirectionPayload {
    pub format: AudioFormatPayload,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFormatPayload {
    #[serde(rename = "type")]
    pub kind: String,
    pub rate: u32,
}

// =============================================================================
// Conversation items
// =============================================================================

/// Conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationItem {
    #[serde(rename = "type")]
    pub item_type: String,
    pub role: String,
    pub content: Vec<ContentPart>,
}

/// Content part within a conversation item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub content_type: String,
    pub text: String,
}

impl ConversationItem {
    /// Typed user message.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self {
            item_type: "message".to_string(),
            role: "user".to_string(),
            content: vec![ContentPart {
                content_type: "input_text".to_string(),
                text: text.into(),
            }],
        }
    }
}

// =============================================================================
// Client events
// =============================================================================

/// Events sent to the upstream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionPayload },

    /// Base64-encoded audio
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },

    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit,

    #[serde(rename = "conversation.item.create")]
    ConversationItemCreate { item: ConversationItem },

    #[serde(rename = "response.create")]
    ResponseCreate,
}

impl ClientEvent {
    pub fn to_frame(&self) -> VoiceResult<Frame> {
        to_text_frame(self)
    }
}

// =============================================================================
// Relay notices
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub message: String,
}

/// Events the relay itself sends downstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RelayNotice {
    #[serde(rename = "server_log")]
    ServerLog { message: String },

    #[serde(rename = "error")]
    Error { error: ErrorBody },
}

impl RelayNotice {
    pub fn server_log(message: impl Into<String>) -> Self {
        RelayNotice::ServerLog {
            message: message.into(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        RelayNotice::Error {
            error: ErrorBody {
                message: message.into(),
            },
        }
    }

    pub fn to_frame(&self) -> VoiceResult<Frame> {
        to_text_frame(self)
    }
}

// =============================================================================
// Relay hello
// =============================================================================

/// First message a downstream peer sends to the relay.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RelayHello {
    #[serde(default)]
    pub instructions: Option<String>,
    #[serde(default)]
    pub voice: Option<String>,
}

fn to_text_frame<T: Serialize>(value: &T) -> VoiceResult<Frame> {
    serde_json::to_string(value)
        .map(Frame::Text)
        .map_err(|e| VoiceError::MalformedEvent(format!("failed to serialize event: {e}")))
}
