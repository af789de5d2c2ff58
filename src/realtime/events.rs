//! Data-channel events from the realtime-audio service.
//!
//! Messages are decoded once at the data-channel boundary into
//! [`RealtimeEvent`]; consumers match on the enum instead of the raw `type`
//! string.

use serde::Deserialize;

pub const TRANSCRIPTION_COMPLETED: &str = "conversation.item.input_audio_transcription.completed";
pub const SPEECH_STARTED: &str = "input_audio_buffer.speech_started";
pub const SPEECH_STOPPED: &str = "input_audio_buffer.speech_stopped";
pub const ERROR: &str = "error";

const UNKNOWN_ERROR_MESSAGE: &str = "Unknown error occurred";

/// A decoded data-channel event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RealtimeEvent {
    /// A finished transcription of one input audio segment.
    TranscriptionCompleted { transcript: String },
    /// Server VAD detected the start of user speech.
    SpeechStarted,
    /// Server VAD detected the end of user speech.
    SpeechStopped,
    /// The service reported an error.
    Error { message: String },
    /// Any event type this crate does not act on.
    Unknown { kind: String },
}

#[derive(Deserialize)]
struct RawEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    transcript: Option<String>,
    #[serde(default)]
    error: Option<RawError>,
}

#[derive(Deserialize)]
struct RawError {
    #[serde(default)]
    message: Option<String>,
}

impl RealtimeEvent {
    /// Decode one JSON data-channel message.
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        let event: RawEvent = serde_json::from_str(raw)?;

        Ok(match event.kind.as_str() {
            TRANSCRIPTION_COMPLETED => RealtimeEvent::TranscriptionCompleted {
                transcript: event.transcript.unwrap_or_default(),
            },
            SPEECH_STARTED => RealtimeEvent::SpeechStarted,
            SPEECH_STOPPED => RealtimeEvent::SpeechStopped,
            ERROR => RealtimeEvent::Error {
                message: event
                    .error
                    .and_then(|e| e.message)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| UNKNOWN_ERROR_MESSAGE.to_string()),
            },
            _ => RealtimeEvent::Unknown { kind: event.kind },
        })
    }

    /// The wire `type` of this event.
    pub fn kind(&self) -> &str {
        match self {
            RealtimeEvent::TranscriptionCompleted { .. } => TRANSCRIPTION_COMPLETED,
            RealtimeEvent::SpeechStarted => SPEECH_STARTED,
            RealtimeEvent::SpeechStopped => SPEECH_STOPPED,
            RealtimeEvent::Error { .. } => ERROR,
            RealtimeEvent::Unknown { kind } => kind,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_transcription_completed() {
        let event = RealtimeEvent::parse(
            r#"{"type":"conversation.item.input_audio_transcription.completed","item_id":"it_1","transcript":"Our company solves X"}"#,
        )
        .unwrap();
        assert_eq!(
            event,
            RealtimeEvent::TranscriptionCompleted {
                transcript: "Our company solves X".to_string()
            }
        );
    }

    #[test]
    fn test_parse_speech_activity() {
        assert_eq!(
            RealtimeEvent::parse(r#"{"type":"input_audio_buffer.speech_started","audio_start_ms":120}"#)
                .unwrap(),
            RealtimeEvent::SpeechStarted
        );
        assert_eq!(
            RealtimeEvent::parse(r#"{"type":"input_audio_buffer.speech_stopped"}"#).unwrap(),
            RealtimeEvent::SpeechStopped
        );
    }

    #[test]
    fn test_parse_error_message() {
        let event =
            RealtimeEvent::parse(r#"{"type":"error","error":{"message":"rate limited"}}"#).unwrap();
        assert_eq!(
            event,
            RealtimeEvent::Error {
                message: "rate limited".to_string()
            }
        );

        let event = RealtimeEvent::parse(r#"{"type":"error"}"#).unwrap();
        assert_eq!(
            event,
            RealtimeEvent::Error {
                message: "Unknown error occurred".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_types_are_not_errors() {
        let event = RealtimeEvent::parse(r#"{"type":"response.audio.delta","delta":"AAAA"}"#).unwrap();
        assert_eq!(event.kind(), "response.audio.delta");
        assert!(matches!(event, RealtimeEvent::Unknown { .. }));
    }

    #[test]
    fn test_malformed_json_is_rejected() {
        assert!(RealtimeEvent::parse("not json").is_err());
        assert!(RealtimeEvent::parse(r#"{"transcript":"no type"}"#).is_err());
    }
}
