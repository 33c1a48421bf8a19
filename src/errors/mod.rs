//! Error types for the voice relay.
//!
//! - `VoiceError` is the taxonomy used by the core (credential acquisition,
//!   session negotiation, transports, codec, audio devices).
//! - `AppError` is the HTTP-facing error returned by the axum handlers.

pub mod app_error;

use std::fmt;

use thiserror::Error;

pub use app_error::{AppError, AppResult};

/// Stage of a session at which a transport failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStage {
    /// Acquiring the credential
    Credential,
    /// Opening the upstream or downstream transport
    Connect,
    /// Sending the session configuration
    Negotiate,
    /// Exchanging audio and events
    Conversing,
}

impl fmt::Display for SessionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStage::Credential => write!(f, "credential"),
            SessionStage::Connect => write!(f, "connect"),
            SessionStage::Negotiate => write!(f, "negotiate"),
            SessionStage::Conversing => write!(f, "conversing"),
        }
    }
}

/// Errors produced by the relay core.
#[derive(Debug, Error)]
pub enum VoiceError {
    /// No usable credential or configuration at all
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Voice identifier is not one of the presets
    #[error("Invalid voice '{0}': expected one of Ara, Rex, Sal, Eve, Leo")]
    InvalidVoice(String),

    /// Connection refused, reset, or closed mid-stream
    #[error("Transport error during {stage}: {message}")]
    Transport { stage: SessionStage, message: String },

    /// Inbound message that could not be parsed
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Audio device could not be opened or failed
    #[error("Audio device error: {0}")]
    Device(String),
}

impl VoiceError {
    /// Build a transport error for the given stage.
    pub fn transport(stage: SessionStage, message: impl Into<String>) -> Self {
        VoiceError::Transport {
            stage,
            message: message.into(),
        }
    }

    /// Whether the error terminates the session it happened in.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, VoiceError::MalformedEvent(_))
    }
}

/// Result type for core operations.
pub type VoiceResult<T> = Result<T, VoiceError>;
