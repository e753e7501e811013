use std::path::PathBuf;
use std::time::Duration;

use crate::recording::RecordingConfig;

/// Configuration for a call session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Rate of outbound mic frames (the transcriber expects 16kHz)
    pub transcription_rate: u32,

    /// Ringing time after the channel opens, before `ready_for_streaming`
    /// Default: 1 second
    pub connect_delay: Duration,

    /// Looping ringtone played while Ringing/Connecting
    pub ring_cue: Option<PathBuf>,

    /// Beep played once the handshake is sent; Talking starts when it ends
    pub connect_cue: Option<PathBuf>,

    pub recording: RecordingConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            transcription_rate: 16000,
            connect_delay: Duration::from_millis(1000),
            ring_cue: None,
            connect_cue: None,
            recording: RecordingConfig::default(),
        }
    }
}
