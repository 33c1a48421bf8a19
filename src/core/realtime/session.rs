//! Session configuration and the one-time `session.update` handshake.

use std::fmt;
use std::str::FromStr;

use tracing::{debug, info};

use super::messages::{
    AudioDirectionPayload, AudioFormatPayload, AudioPayload, ClientEvent, SessionPayload,
    TurnDetectionPayload,
};
use crate::core::audio::{AudioSpec, SampleFormat};
use crate::core::transport::FrameSink;
use crate::errors::{SessionStage, VoiceError, VoiceResult};

/// Instructions used when a peer supplies none.
pub const DEFAULT_INSTRUCTIONS: &str = "You are a helpful AI.";

// =============================================================================
// Voice
// =============================================================================

/// The five voice presets offered by the upstream endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Voice {
    #[default]
    Ara,
    Rex,
    Sal,
    Eve,
    Leo,
}

impl Voice {
    pub const ALL: [Voice; 5] = [Voice::Ara, Voice::Rex, Voice::Sal, Voice::Eve, Voice::Leo];

    pub fn all() -> &'static [Voice] {
        &Self::ALL
    }

    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(|v| v.as_str()).collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Voice::Ara => "Ara",
            Voice::Rex => "Rex",
            Voice::Sal => "Sal",
            Voice::Eve => "Eve",
            Voice::Leo => "Leo",
        }
    }
}

impl fmt::Display for Voice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Voice {
    type Err = VoiceError;

    /// Exact, case-sensitive match.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|v| v.as_str() == s)
            .ok_or_else(|| VoiceError::InvalidVoice(s.to_string()))
    }
}

// =============================================================================
// Session configuration
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Modality {
    Text,
    Audio,
}

impl Modality {
    pub fn as_str(&self) -> &'static str {
        match self {
            Modality::Text => "text",
            Modality::Audio => "audio",
        }
    }
}

/// Audio format of one direction of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioFormat {
    pub sample_format: SampleFormat,
    pub sample_rate: u32,
}

impl AudioFormat {
    /// Flat format name (`pcm16`).
    pub fn wire_name(&self) -> &'static str {
        match self.sample_format {
            SampleFormat::Pcm16 => "pcm16",
        }
    }

    /// MIME-style format type (`audio/pcm`).
    pub fn mime_type(&self) -> &'static str {
        match self.sample_format {
            SampleFormat::Pcm16 => "audio/pcm",
        }
    }

    fn payload(&self) -> AudioDirectionPayload {
        AudioDirectionPayload {
            format: AudioFormatPayload {
                kind: self.mime_type().to_string(),
                rate: self.sample_rate,
            },
        }
    }
}

impl From<AudioSpec> for AudioFormat {
    fn from(spec: AudioSpec) -> Self {
        Self {
            sample_format: spec.format,
            sample_rate: spec.sample_rate,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TurnDetectionMode {
    /// Upstream voice activity detection ends the user's turn
    #[default]
    ServerVad,
    /// The client commits audio itself
    Manual,
}

/// Immutable per-session configuration, sent exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub voice: Voice,
    pub instructions: String,
    /// Ordered, without duplicates
    pub modalities: Vec<Modality>,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub turn_detection: TurnDetectionMode,
}

impl SessionConfig {
    /// The `session.update` event carrying this configuration.
    pub fn to_event(&self) -> ClientEvent {
        let turn_detection = match self.turn_detection {
            TurnDetectionMode::ServerVad => Some(TurnDetectionPayload {
                kind: "server_vad".to_string(),
            }),
            TurnDetectionMode::Manual => None,
        };

        ClientEvent::SessionUpdate {
            session: SessionPayload {
                modalities: self.modalities.iter().map(|m| m.as_str().to_string()).collect(),
                instructions: self.instructions.clone(),
                voice: self.voice.to_string(),
                input_audio_format: self.input_audio_format.wire_name().to_string(),
                output_audio_format: self.output_audio_format.wire_name().to_string(),
                turn_detection,
                audio: AudioPayload {
                    input: self.input_audio_format.payload(),
                    output: self.output_audio_format.payload(),
                },
            },
        }
    }
}

// =============================================================================
// Persona input
// =============================================================================

/// Persona data handed over by the external profile store.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PersonaProfile {
    pub instructions: String,
    pub voice_id: String,
    /// Conversational goals, in priority order
    pub goals: Vec<String>,
}

/// Synchronous lookup into the external profile store.
pub trait ProfileLookup: Send + Sync {
    fn lookup(&self, profile_id: &str) -> Option<PersonaProfile>;
}

/// Append the goals to the persona instructions as numbered hidden objectives.
pub fn compose_instructions(persona: &str, goals: &[String]) -> String {
    if goals.is_empty() {
        return persona.to_string();
    }

    let mut out = String::from(persona.trim_end());
    out.push_str("\n\n### HIDDEN OBJECTIVES ###\n");
    out.push_str("Subtly steer the conversation towards these outcomes:\n");
    for (idx, goal) in goals.iter().enumerate() {
        out.push_str(&format!("{}. {}\n", idx + 1, goal));
    }
    out
}

// =============================================================================
// Negotiator
// =============================================================================

/// Builds and sends the session configuration.
#[derive(Debug, Clone, Copy)]
pub struct SessionNegotiator {
    audio: AudioSpec,
    turn_detection: TurnDetectionMode,
}

impl Default for SessionNegotiator {
    fn default() -> Self {
        Self::new(AudioSpec::default())
    }
}

impl SessionNegotiator {
    pub fn new(audio: AudioSpec) -> Self {
        Self {
            audio,
            turn_detection: TurnDetectionMode::default(),
        }
    }

    pub fn with_turn_detection(mut self, mode: TurnDetectionMode) -> Self {
        self.turn_detection = mode;
        self
    }

    pub fn audio_spec(&self) -> AudioSpec {
        self.audio
    }

    /// Build the configuration for one session.
    ///
    /// Fails with `InvalidVoice` unless `voice_id` is exactly one of the
    /// presets. Empty `modalities` means text and audio.
    pub fn build_config(
        &self,
        voice_id: &str,
        instructions: &str,
        modalities: &[Modality],
    ) -> VoiceResult<SessionConfig> {
        let voice: Voice = voice_id.parse()?;

        let mut ordered = Vec::with_capacity(2);
        let requested = if modalities.is_empty() {
            &[Modality::Text, Modality::Audio][..]
        } else {
            modalities
        };
        for m in requested {
            if !ordered.contains(m) {
                ordered.push(*m);
            }
        }

        let format = AudioFormat::from(self.audio);
        Ok(SessionConfig {
            voice,
            instructions: instructions.to_string(),
            modalities: ordered,
            input_audio_format: format,
            output_audio_format: format,
            turn_detection: self.turn_detection,
        })
    }

    /// Build the configuration from a stored persona and its goals.
    pub fn build_from_profile(
        &self,
        profiles: &dyn ProfileLookup,
        profile_id: &str,
    ) -> VoiceResult<SessionConfig> {
        let profile = profiles
            .lookup(profile_id)
            .ok_or_else(|| VoiceError::Configuration(format!("unknown profile '{profile_id}'")))?;
        let instructions = compose_instructions(&profile.instructions, &profile.goals);
        self.build_config(&profile.voice_id, &instructions, &[])
    }

    /// Send the configuration. Must be the first message on the transport.
    pub async fn send(&self, sink: &mut dyn FrameSink, config: &SessionConfig) -> VoiceResult<()> {
        let frame = config.to_event().to_frame()?;
        debug!(bytes = frame.len(), "Sending session.update");
        sink.send(frame).await.map_err(|e| match e {
            VoiceError::Transport { message, .. } => {
                VoiceError::transport(SessionStage::Negotiate, message)
            }
            other => other,
        })?;
        info!(voice = %config.voice, "Session configured");
        Ok(())
    }
}
