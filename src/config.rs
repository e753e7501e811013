use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde::Deserialize;

use crate::audio::AudioBackendConfig;
use crate::error::CallError;
use crate::recording::{RecordingConfig, RecordingPolicy};
use crate::session::SessionConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub service: ServiceConfig,
    #[serde(default)]
    pub call: CallConfig,
    #[serde(default)]
    pub playback: PlaybackSettings,
    #[serde(default)]
    pub recording: RecordingSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    pub name: String,
    pub http: HttpConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CallConfig {
    /// Default call endpoint, e.g. `ws://localhost:8000/ws/speech/alice/default/`
    pub endpoint: Option<String>,
    pub transcription_rate: u32,
    pub block_size: usize,
    pub connect_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub ring_cue: Option<PathBuf>,
    pub connect_cue: Option<PathBuf>,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            transcription_rate: 16000,
            block_size: 1024,
            connect_delay_ms: 1000,
            connect_timeout_ms: 10_000,
            ring_cue: None,
            connect_cue: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Rate of inbound synthesized voice
    pub voice_rate: u32,
    /// Output device rate
    pub device_rate: u32,
    /// Samples pulled per render
    pub quantum: usize,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            voice_rate: 16000,
            device_rate: 16000,
            quantum: 128,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RecordingSettings {
    pub sample_rate: u32,
    pub chunk_duration_ms: u64,
    pub render_interval_ms: u64,
    pub policy: RecordingPolicy,
    pub mic_activity_threshold: f32,
    /// Where finished recordings are written
    pub output_dir: PathBuf,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        let defaults = RecordingConfig::default();
        Self {
            sample_rate: defaults.sample_rate,
            chunk_duration_ms: defaults.chunk_duration_ms,
            render_interval_ms: defaults.render_interval_ms,
            policy: defaults.policy,
            mic_activity_threshold: defaults.mic_activity_threshold,
            output_dir: PathBuf::from("recordings"),
        }
    }
}

impl Config {
    /// Load `path` (extension optional) with `VOICE_CALL__SECTION__KEY`
    /// environment overrides on top.
    pub fn load(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("VOICE_CALL").separator("__"))
            .build()?;

        let cfg: Self = settings.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject sample rates the converters cannot work with.
    pub fn validate(&self) -> crate::Result<()> {
        let rates = [
            ("call.transcription_rate", self.call.transcription_rate),
            ("playback.voice_rate", self.playback.voice_rate),
            ("playback.device_rate", self.playback.device_rate),
            ("recording.sample_rate", self.recording.sample_rate),
        ];
        for (key, rate) in rates {
            if rate == 0 {
                return Err(CallError::Encoding(format!("{} must be a positive sample rate", key)));
            }
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            transcription_rate: self.call.transcription_rate,
            connect_delay: Duration::from_millis(self.call.connect_delay_ms),
            ring_cue: self.call.ring_cue.clone(),
            connect_cue: self.call.connect_cue.clone(),
            recording: self.recording_config(),
        }
    }

    pub fn recording_config(&self) -> RecordingConfig {
        RecordingConfig {
            sample_rate: self.recording.sample_rate,
            chunk_duration_ms: self.recording.chunk_duration_ms,
            render_interval_ms: self.recording.render_interval_ms,
            policy: self.recording.policy,
            mic_activity_threshold: self.recording.mic_activity_threshold,
        }
    }

    pub fn backend_config(&self) -> AudioBackendConfig {
        AudioBackendConfig {
            sample_rate: self.call.transcription_rate,
            block_size: self.call.block_size,
            ..AudioBackendConfig::default()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.call.connect_timeout_ms)
    }
}
