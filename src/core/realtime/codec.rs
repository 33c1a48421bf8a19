//! Audio payload encoding and inbound event classification.
//!
//! Audio travels inside JSON as standard base64. Inbound messages are
//! classified by their `type` string into a closed set of kinds; unknown kinds
//! become `ProtocolEvent::Other` so new upstream events pass through.

use std::borrow::Cow;

use base64::prelude::*;
use serde::Deserialize;
use serde_json::Value;

use super::messages::ClientEvent;
use crate::core::transport::Frame;
use crate::errors::{VoiceError, VoiceResult};

/// Classified protocol message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolEvent {
    /// `session.update` (outbound only)
    SessionUpdate,
    /// `input_audio_buffer.append` (outbound)
    InputAudioAppend { audio: String },
    /// `response.created`: an assistant turn started
    ResponseCreated,
    /// `*audio.delta`: base64 audio chunk
    ResponseAudioDelta { delta: String },
    /// `*transcript.delta` / `*text.delta`
    ResponseTextDelta { delta: String },
    /// Completed transcription of the user's audio
    InputTranscript { text: String },
    /// `response.done`: the assistant turn ended
    ResponseDone,
    /// `error`
    Error { message: String },
    /// `server_log` (relay only)
    ServerLog { message: String },
    /// Any other kind, passed through untouched
    Other { kind: String },
}

impl ProtocolEvent {
    /// Short label for logs.
    pub fn kind(&self) -> &str {
        match self {
            ProtocolEvent::SessionUpdate => "session.update",
            ProtocolEvent::InputAudioAppend { .. } => "input_audio_buffer.append",
            ProtocolEvent::ResponseCreated => "response.created",
            ProtocolEvent::ResponseAudioDelta { .. } => "response.audio.delta",
            ProtocolEvent::ResponseTextDelta { .. } => "response.text.delta",
            ProtocolEvent::InputTranscript { .. } => "input_audio_transcription.completed",
            ProtocolEvent::ResponseDone => "response.done",
            ProtocolEvent::Error { .. } => "error",
            ProtocolEvent::ServerLog { .. } => "server_log",
            ProtocolEvent::Other { kind } => kind,
        }
    }
}

/// Only the discriminator of a message; every other field is skipped.
#[derive(Deserialize)]
struct KindOnly<'a> {
    #[serde(rename = "type", borrow)]
    kind: Cow<'a, str>,
}

/// Stateless codec for the realtime protocol.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Raw audio bytes to base64 text.
    pub fn encode_audio(raw: &[u8]) -> String {
        BASE64_STANDARD.encode(raw)
    }

    /// Base64 text back to raw audio bytes.
    pub fn decode_audio(text: &str) -> VoiceResult<Vec<u8>> {
        BASE64_STANDARD
            .decode(text)
            .map_err(|e| VoiceError::MalformedEvent(format!("invalid base64 audio: {e}")))
    }

    /// `input_audio_buffer.append` event for one captured chunk.
    pub fn audio_append(raw: &[u8]) -> ClientEvent {
        ClientEvent::InputAudioBufferAppend {
            audio: Self::encode_audio(raw),
        }
    }

    /// Event kind of a frame without building its payload: the `type` of a
    /// text frame, `"binary"` for binary frames, `"unparsed"` otherwise.
    pub fn frame_kind(frame: &Frame) -> Cow<'_, str> {
        match frame {
            Frame::Binary(_) => Cow::Borrowed("binary"),
            Frame::Text(text) => match serde_json::from_str::<KindOnly<'_>>(text) {
                Ok(only) => only.kind,
                Err(_) => Cow::Borrowed("unparsed"),
            },
        }
    }

    /// Parse a JSON protocol message into a `ProtocolEvent`.
    ///
    /// Fails with `MalformedEvent` if the message is not a JSON object with a
    /// string `type`.
    pub fn classify(raw: &str) -> VoiceResult<ProtocolEvent> {
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| VoiceError::MalformedEvent(format!("invalid JSON: {e}")))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| VoiceError::MalformedEvent("missing string 'type' field".to_string()))?;

        let text_field = |name: &str| {
            value
                .get(name)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string()
        };

        let event = match kind {
            "session.update" => ProtocolEvent::SessionUpdate,
            "input_audio_buffer.append" => ProtocolEvent::InputAudioAppend {
                audio: text_field("audio"),
            },
            "response.created" => ProtocolEvent::ResponseCreated,
            "response.done" => ProtocolEvent::ResponseDone,
            "conversation.item.input_audio_transcription.completed" => {
                ProtocolEvent::InputTranscript {
                    text: text_field("transcript"),
                }
            }
            "error" => ProtocolEvent::Error {
                message: value
                    .pointer("/error/message")
                    .or_else(|| value.get("message"))
                    .and_then(Value::as_str)
                    .unwrap_or("unknown error")
                    .to_string(),
            },
            "server_log" => ProtocolEvent::ServerLog {
                message: text_field("message"),
            },
            k if k.ends_with("audio.delta") => ProtocolEvent::ResponseAudioDelta {
                delta: text_field("delta"),
            },
            k if k.ends_with("transcript.delta") || k.ends_with("text.delta") => {
                ProtocolEvent::ResponseTextDelta {
                    delta: text_field("delta"),
                }
            }
            other => ProtocolEvent::Other {
                kind: other.to_string(),
            },
        };

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_audio_round_trip_edges() {
        let samples: [&[u8]; 4] = [&[], &[0], &[0, 0, 0], &[0xff, 0x00, 0x7f, 0x80, 0x01]];
        for raw in samples {
            let text = FrameCodec::encode_audio(raw);
            assert_eq!(FrameCodec::decode_audio(&text).unwrap(), raw);
        }
        let all: Vec<u8> = (0..=255).collect();
        assert_eq!(
            FrameCodec::decode_audio(&FrameCodec::encode_audio(&all)).unwrap(),
            all
        );
    }

    #[test]
    fn test_three_zero_bytes() {
        assert_eq!(FrameCodec::encode_audio(&[0, 0, 0]), "AAAA");
        assert_eq!(FrameCodec::decode_audio("AAAA").unwrap(), vec![0, 0, 0]);
    }

    #[test]
    fn test_decode_invalid_base64() {
        let err = FrameCodec::decode_audio("not base64!").unwrap_err();
        assert!(matches!(err, VoiceError::MalformedEvent(_)));
    }

    #[test]
    fn test_classify_known_kinds() {
        assert_eq!(
            FrameCodec::classify(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).unwrap(),
            ProtocolEvent::ResponseAudioDelta {
                delta: "AAAA".into()
            }
        );
        assert_eq!(
            FrameCodec::classify(r#"{"type":"response.output_audio.delta","delta":"AQ=="}"#)
                .unwrap(),
            ProtocolEvent::ResponseAudioDelta {
                delta: "AQ==".into()
            }
        );
        assert_eq!(
            FrameCodec::classify(r#"{"type":"response.audio_transcript.delta","delta":"Hi"}"#)
                .unwrap(),
            ProtocolEvent::ResponseTextDelta { delta: "Hi".into() }
        );
        assert_eq!(
            FrameCodec::classify(r#"{"type":"response.text.delta","delta":"yo"}"#).unwrap(),
            ProtocolEvent::ResponseTextDelta { delta: "yo".into() }
        );
        assert_eq!(
            FrameCodec::classify(r#"{"type":"response.done","response":{}}"#).unwrap(),
            ProtocolEvent::ResponseDone
        );
        assert_eq!(
            FrameCodec::classify(r#"{"type":"response.created"}"#).unwrap(),
            ProtocolEvent::ResponseCreated
        );
        assert_eq!(
            FrameCodec::classify(r#"{"type":"error","error":{"message":"bad"}}"#).unwrap(),
            ProtocolEvent::Error {
                message: "bad".into()
            }
        );
        assert_eq!(
            FrameCodec::classify(r#"{"type":"server_log","message":"Connected"}"#).unwrap(),
            ProtocolEvent::ServerLog {
                message: "Connected".into()
            }
        );
        assert_eq!(
            FrameCodec::classify(
                r#"{"type":"conversation.item.input_audio_transcription.completed","transcript":"hello"}"#
            )
            .unwrap(),
            ProtocolEvent::InputTranscript {
                text: "hello".into()
            }
        );
    }

    #[test]
    fn test_classify_outbound_kinds() {
        let append = FrameCodec::audio_append(&[0, 0, 0]).to_frame().unwrap();
        let Frame::Text(text) = &append else {
            panic!("expected text");
        };
        assert_eq!(
            FrameCodec::classify(text).unwrap(),
            ProtocolEvent::InputAudioAppend {
                audio: "AAAA".into()
            }
        );
        assert_eq!(FrameCodec::frame_kind(&append), "input_audio_buffer.append");
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let event = FrameCodec::classify(r#"{"type":"rate_limits.updated","x":1}"#).unwrap();
        assert_eq!(
            event,
            ProtocolEvent::Other {
                kind: "rate_limits.updated".into()
            }
        );
        assert_eq!(event.kind(), "rate_limits.updated");
    }

    #[test]
    fn test_malformed_messages() {
        for raw in ["not json", "[1,2]", r#"{"no_type":1}"#, r#"{"type":5}"#, ""] {
            let err = FrameCodec::classify(raw).unwrap_err();
            assert!(matches!(err, VoiceError::MalformedEvent(_)), "{raw}");
            assert!(!err.is_fatal());
        }
    }

    #[test]
    fn test_missing_delta_is_empty() {
        assert_eq!(
            FrameCodec::classify(r#"{"type":"response.audio.delta"}"#).unwrap(),
            ProtocolEvent::ResponseAudioDelta {
                delta: String::new()
            }
        );
    }

    #[test]
    fn test_frame_kind() {
        let audio = FrameCodec::encode_audio(&vec![7u8; 48_000]);
        let append = Frame::Text(format!(r#"{{"type":"input_audio_buffer.append","audio":"{audio}"}}"#));
        assert_eq!(FrameCodec::frame_kind(&append), "input_audio_buffer.append");
        assert!(matches!(FrameCodec::frame_kind(&append), Cow::Borrowed(_)));

        assert_eq!(FrameCodec::frame_kind(&Frame::Binary(Bytes::from_static(&[1, 2]))), "binary");
        assert_eq!(FrameCodec::frame_kind(&Frame::Text("not json".into())), "unparsed");
        assert_eq!(FrameCodec::frame_kind(&Frame::Text(r#"{"type":5}"#.into())), "unparsed");
    }
}
