use serde::{Deserialize, Serialize};

use crate::audio::PlaybackEvent;

/// JSON control frames interleaved with binary PCM on the call channel.
///
/// Outbound: `ready_for_streaming`, `audio_started`, `audio_done`,
/// `audio_cleanup`. Inbound: `stop_audio`, `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Client can receive synthesized audio
    ReadyForStreaming,
    /// Local playback went from empty to non-empty
    AudioStarted,
    /// Local playback drained (or was flushed)
    AudioDone,
    /// Discard queued playback immediately (barge-in)
    StopAudio,
    /// Session ending; release server-side resources
    AudioCleanup,
    /// Upstream failure, shown to the user and not retried
    Error { content: String },
}

impl ControlMessage {
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Parse a text frame. Anything that is not a known control message
    /// (transcripts, future message types) yields `None`.
    pub fn parse(text: &str) -> Option<Self> {
        serde_json::from_str(text).ok()
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::ReadyForStreaming => "ready_for_streaming",
            ControlMessage::AudioStarted => "audio_started",
            ControlMessage::AudioDone => "audio_done",
            ControlMessage::StopAudio => "stop_audio",
            ControlMessage::AudioCleanup => "audio_cleanup",
            ControlMessage::Error { .. } => "error",
        }
    }
}

impl From<PlaybackEvent> for ControlMessage {
    fn from(event: PlaybackEvent) -> Self {
        match event {
            PlaybackEvent::AudioStarted => ControlMessage::AudioStarted,
            PlaybackEvent::AudioDone => ControlMessage::AudioDone,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_messages_serialize_as_type_only() {
        assert_eq!(
            ControlMessage::ReadyForStreaming.to_json().unwrap(),
            r#"{"type":"ready_for_streaming"}"#
        );
        assert_eq!(
            ControlMessage::AudioCleanup.to_json().unwrap(),
            r#"{"type":"audio_cleanup"}"#
        );
    }

    #[test]
    fn test_parse_inbound_messages() {
        assert_eq!(
            ControlMessage::parse(r#"{"type": "stop_audio"}"#),
            Some(ControlMessage::StopAudio)
        );
        assert_eq!(
            ControlMessage::parse(r#"{"type": "error", "content": "tts quota exceeded"}"#),
            Some(ControlMessage::Error {
                content: "tts quota exceeded".to_string()
            })
        );
    }

    #[test]
    fn test_parse_ignores_unknown_text() {
        assert_eq!(ControlMessage::parse(r#"{"transcription": "hello"}"#), None);
        assert_eq!(ControlMessage::parse(r#"{"type": "something_new"}"#), None);
        assert_eq!(ControlMessage::parse("not json"), None);
    }

    #[test]
    fn test_playback_events_map_to_turn_taking() {
        assert_eq!(ControlMessage::from(PlaybackEvent::AudioStarted), ControlMessage::AudioStarted);
        assert_eq!(ControlMessage::from(PlaybackEvent::AudioDone), ControlMessage::AudioDone);
        assert_eq!(ControlMessage::AudioDone.kind(), "audio_done");
    }
}
