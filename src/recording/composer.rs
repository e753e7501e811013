use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::artifact::{RecordingArtifact, StartTrigger};
use super::chunk::{ChunkConfig, ChunkedRecorder};
use crate::audio::convert;
use crate::audio::{AudioFrame, CapturedBlock, ChunkPlaybackBuffer, PlaybackConfig};
use crate::error::Result;

/// When a call recording begins
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingPolicy {
    /// Only once the agent starts speaking
    #[default]
    OnVoice,
    /// On the agent's first frame or on user speech, whichever comes first
    OnVoiceOrMic,
}

#[derive(Debug, Clone)]
pub struct RecordingConfig {
    /// Rate of the recorded mix
    pub sample_rate: u32,
    pub chunk_duration_ms: u64,
    /// Period of the render clock
    pub render_interval_ms: u64,
    pub policy: RecordingPolicy,
    /// Mic RMS that counts as activity under `OnVoiceOrMic`
    pub mic_activity_threshold: f32,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44100,
            chunk_duration_ms: 1000,
            render_interval_ms: 10,
            policy: RecordingPolicy::OnVoice,
            mic_activity_threshold: 0.02,
        }
    }
}

impl RecordingConfig {
    fn quantum(&self) -> usize {
        ((self.sample_rate as u64 * self.render_interval_ms) / 1000).max(1) as usize
    }
}

#[derive(Default)]
struct Mixdown {
    recorder: Option<ChunkedRecorder>,
    voice_scratch: Vec<f32>,
    mic_scratch: Vec<f32>,
    mixed_scratch: Vec<i16>,
}

/// Mixes the microphone and the synthesized voice into one recording.
///
/// Each source feeds its own playback buffer at the recording rate. A
/// render clock pulls equal quanta from both, sums them with clipping and
/// appends the result to a chunked recorder. Nothing is recorded until the
/// start condition fires.
pub struct RecordingComposer {
    session_id: String,
    config: RecordingConfig,
    voice: ChunkPlaybackBuffer,
    mic: ChunkPlaybackBuffer,
    mixdown: Arc<Mutex<Mixdown>>,
    started_by: Option<StartTrigger>,
    clocked: bool,
    clock: Option<JoinHandle<()>>,
    stopped: bool,
}

impl RecordingComposer {
    pub fn new(session_id: impl Into<String>, config: RecordingConfig) -> Self {
        let voice = ChunkPlaybackBuffer::new(PlaybackConfig::at(config.sample_rate));
        let mic = ChunkPlaybackBuffer::new(PlaybackConfig::at(config.sample_rate));

        Self {
            session_id: session_id.into(),
            config,
            voice,
            mic,
            mixdown: Arc::new(Mutex::new(Mixdown::default())),
            started_by: None,
            clocked: true,
            clock: None,
            stopped: false,
        }
    }

    /// Render only when [`render_quantum`](Self::render_quantum) is called
    pub fn without_clock(mut self) -> Self {
        self.clocked = false;
        self
    }

    /// Add a synthesized-voice frame. Starts the recording on the first one.
    pub fn ingest_voice(&mut self, frame: AudioFrame) -> Option<StartTrigger> {
        if self.stopped {
            return None;
        }
        let trigger = if self.started_by.is_none() {
            self.begin(StartTrigger::VoiceFrame);
            Some(StartTrigger::VoiceFrame)
        } else {
            None
        };

        self.voice.enqueue(frame);
        trigger
    }

    /// Add a raw mic block. Ignored until recording starts, unless the
    /// policy lets mic activity start it.
    pub fn ingest_mic(&mut self, block: &CapturedBlock) -> Option<StartTrigger> {
        if self.stopped {
            return None;
        }

        let mut trigger = None;
        if self.started_by.is_none() {
            if self.config.policy != RecordingPolicy::OnVoiceOrMic
                || convert::rms(&block.samples) < self.config.mic_activity_threshold
            {
                return None;
            }
            self.begin(StartTrigger::MicActivity);
            trigger = Some(StartTrigger::MicActivity);
        }

        self.mic.enqueue_samples(&block.samples, block.sample_rate);
        trigger
    }

    /// Flush queued voice (barge-in)
    pub fn reset_voice(&self) {
        self.voice.reset();
    }

    /// Mix one render quantum into the recording. No-op before start.
    pub fn render_quantum(&self) {
        render(&self.voice, &self.mic, &self.mixdown, self.config.quantum());
    }

    pub fn started_by(&self) -> Option<StartTrigger> {
        self.started_by
    }

    pub fn is_recording(&self) -> bool {
        self.started_by.is_some() && !self.stopped
    }

    /// Samples recorded so far
    pub fn recorded_samples(&self) -> usize {
        lock(&self.mixdown)
            .recorder
            .as_ref()
            .map(|r| r.sample_count())
            .unwrap_or(0)
    }

    fn begin(&mut self, trigger: StartTrigger) {
        self.started_by = Some(trigger);
        lock(&self.mixdown).recorder = Some(ChunkedRecorder::new(ChunkConfig {
            chunk_duration_ms: self.config.chunk_duration_ms,
            sample_rate: self.config.sample_rate,
        }));
        info!("Recording started for {} ({:?})", self.session_id, trigger);

        if self.clocked {
            let voice = self.voice.clone();
            let mic = self.mic.clone();
            let mixdown = self.mixdown.clone();
            let quantum = self.config.quantum();
            let period = Duration::from_millis(self.config.render_interval_ms.max(1));

            self.clock = Some(tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
                loop {
                    ticker.tick().await;
                    render(&voice, &mic, &mixdown, quantum);
                }
            }));
        }
    }

    /// Stop composing and finalize the artifact. Whatever is still queued
    /// is mixed in first. Returns `None` if recording never started, and on
    /// every call after the first.
    pub fn stop(&mut self) -> Result<Option<RecordingArtifact>> {
        if self.stopped {
            return Ok(None);
        }
        self.stopped = true;

        if let Some(clock) = self.clock.take() {
            clock.abort();
        }

        let Some(started_by) = self.started_by else {
            debug!("No recording for {}: start condition never fired", self.session_id);
            return Ok(None);
        };

        while !self.voice.is_empty() || !self.mic.is_empty() {
            self.render_quantum();
        }

        let Some(recorder) = lock(&self.mixdown).recorder.take() else {
            return Ok(None);
        };
        let (chunks, samples) = recorder.finish();

        let artifact = RecordingArtifact::encode(
            &self.session_id,
            started_by,
            self.config.sample_rate,
            chunks,
            &samples,
        )?;
        info!(
            "Recording finalized for {}: {:.1}s in {} chunks",
            self.session_id,
            artifact.duration_secs(),
            artifact.chunks.len()
        );
        Ok(Some(artifact))
    }
}

impl Drop for RecordingComposer {
    fn drop(&mut self) {
        if let Some(clock) = self.clock.take() {
            clock.abort();
        }
    }
}

fn render(
    voice: &ChunkPlaybackBuffer,
    mic: &ChunkPlaybackBuffer,
    mixdown: &Arc<Mutex<Mixdown>>,
    quantum: usize,
) {
    let mut guard = lock(mixdown);
    let Mixdown {
        recorder,
        voice_scratch,
        mic_scratch,
        mixed_scratch,
    } = &mut *guard;
    let Some(recorder) = recorder.as_mut() else {
        return;
    };

    voice_scratch.resize(quantum, 0.0);
    mic_scratch.resize(quantum, 0.0);
    voice.pull_into(voice_scratch);
    mic.pull_into(mic_scratch);

    mixed_scratch.clear();
    mixed_scratch.extend(
        voice_scratch
            .iter()
            .zip(mic_scratch.iter())
            .map(|(v, m)| convert::f32_to_i16((v + m).clamp(-1.0, 1.0))),
    );
    recorder.write(mixed_scratch);
}

fn lock(mixdown: &Arc<Mutex<Mixdown>>) -> MutexGuard<'_, Mixdown> {
    mixdown.lock().unwrap_or_else(PoisonError::into_inner)
}
