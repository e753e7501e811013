// Jitter buffer between network audio and a fixed-rate output device
//
// Network frames arrive in bursts of arbitrary size; the device pulls a
// fixed quantum on its own clock. `ChunkPlaybackBuffer` sits between the
// two: `enqueue` converts (and optionally resamples) on the producer side,
// `pull_into` only copies, so the device callback stays bounded.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use super::backend::AudioFrame;
use super::convert;

/// Empty <-> non-empty transitions of a playback buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackEvent {
    AudioStarted,
    AudioDone,
}

/// Configuration for a playback buffer.
///
/// Frames carry their own rate; anything not at `output_rate` is resampled
/// on enqueue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackConfig {
    /// Rate the consumer pulls at
    pub output_rate: u32,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self { output_rate: 16000 }
    }
}

impl PlaybackConfig {
    pub fn at(output_rate: u32) -> Self {
        Self { output_rate }
    }
}

#[derive(Debug, Default)]
struct BufferState {
    queue: VecDeque<f32>,
    playing: bool,
}

/// Append-only sample queue drained from the front by a device pull.
///
/// Cloning yields another handle to the same queue: one side enqueues,
/// the single consumer pulls.
#[derive(Debug, Clone)]
pub struct ChunkPlaybackBuffer {
    config: PlaybackConfig,
    state: Arc<Mutex<BufferState>>,
    events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
}

impl ChunkPlaybackBuffer {
    /// Buffer without lifecycle signaling
    pub fn new(config: PlaybackConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(BufferState::default())),
            events: None,
        }
    }

    /// Buffer that reports `AudioStarted` / `AudioDone` transitions
    pub fn with_signaling(config: PlaybackConfig) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut buffer = Self::new(config);
        buffer.events = Some(tx);
        (buffer, rx)
    }

    pub fn config(&self) -> &PlaybackConfig {
        &self.config
    }

    /// Decode a PCM16 frame and append it.
    pub fn enqueue(&self, frame: AudioFrame) {
        let samples = frame.to_f32();
        self.enqueue_samples(&samples, frame.sample_rate());
    }

    /// Append f32 samples recorded at `sample_rate`.
    pub fn enqueue_samples(&self, samples: &[f32], sample_rate: u32) {
        if samples.is_empty() {
            return;
        }

        let resampled;
        let samples = if sample_rate != self.config.output_rate {
            resampled = convert::resample_linear(samples, sample_rate, self.config.output_rate);
            &resampled[..]
        } else {
            samples
        };

        let mut state = self.lock();
        state.queue.extend(samples.iter().copied());

        if !state.playing && !state.queue.is_empty() {
            state.playing = true;
            self.emit(PlaybackEvent::AudioStarted);
        }
    }

    /// Pull exactly `n` samples, zero-padded when starved.
    pub fn pull(&self, n: usize) -> Vec<f32> {
        let mut out = vec![0.0; n];
        self.pull_into(&mut out);
        out
    }

    /// Fill `out` from the front of the queue, zero-padding the tail.
    ///
    /// Returns how many queued samples were copied. Never blocks on I/O and
    /// never allocates.
    pub fn pull_into(&self, out: &mut [f32]) -> usize {
        let mut state = self.lock();

        let available = out.len().min(state.queue.len());
        for (slot, sample) in out.iter_mut().zip(state.queue.drain(..available)) {
            *slot = sample;
        }
        out[available..].fill(0.0);

        if state.queue.is_empty() && state.playing {
            state.playing = false;
            self.emit(PlaybackEvent::AudioDone);
        }

        available
    }

    /// Drop everything queued (barge-in).
    pub fn reset(&self) {
        let mut state = self.lock();
        let dropped = state.queue.len();
        state.queue.clear();

        if state.playing {
            state.playing = false;
            self.emit(PlaybackEvent::AudioDone);
        }

        if dropped > 0 {
            debug!("Playback buffer reset, dropped {} samples", dropped);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().queue.is_empty()
    }

    pub fn is_playing(&self) -> bool {
        self.lock().playing
    }

    fn emit(&self, event: PlaybackEvent) {
        if let Some(events) = &self.events {
            // Receiver gone means nobody is listening for turn-taking anymore
            let _ = events.send(event);
        }
    }

    // A panic elsewhere must not take the device callback down with it
    fn lock(&self) -> MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(samples: usize) -> AudioFrame {
        AudioFrame::from_samples(&vec![8192i16; samples], 16000)
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<PlaybackEvent>) -> Vec<PlaybackEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    #[test]
    fn test_pull_from_empty_buffer_is_silence() {
        let buffer = ChunkPlaybackBuffer::new(PlaybackConfig::default());

        let out = buffer.pull(128);
        assert_eq!(out.len(), 128);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_enqueue_converts_pcm16() {
        let buffer = ChunkPlaybackBuffer::new(PlaybackConfig::default());
        buffer.enqueue(frame(4));

        assert_eq!(buffer.len(), 4);
        assert_eq!(buffer.pull(4), vec![0.25; 4]);
    }

    #[test]
    fn test_partial_pull_zero_pads() {
        let buffer = ChunkPlaybackBuffer::new(PlaybackConfig::default());
        buffer.enqueue(frame(100));

        let mut out = [1.0f32; 128];
        let copied = buffer.pull_into(&mut out);

        assert_eq!(copied, 100);
        assert!(out[..100].iter().all(|&s| s == 0.25));
        assert!(out[100..].iter().all(|&s| s == 0.0));
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_started_and_done_fire_once() {
        let (buffer, mut rx) = ChunkPlaybackBuffer::with_signaling(PlaybackConfig::default());

        buffer.enqueue(frame(320));
        buffer.enqueue(frame(320));
        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::AudioStarted]);

        while !buffer.is_empty() {
            buffer.pull(128);
        }
        // Repeated pulls of an empty buffer stay quiet
        buffer.pull(128);
        buffer.pull(128);

        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::AudioDone]);
        assert!(!buffer.is_playing());
    }

    #[test]
    fn test_reset_mid_playback() {
        let (buffer, mut rx) = ChunkPlaybackBuffer::with_signaling(PlaybackConfig::default());
        buffer.enqueue(frame(500));
        drain_events(&mut rx);

        buffer.reset();

        assert_eq!(buffer.len(), 0);
        assert_eq!(drain_events(&mut rx), vec![PlaybackEvent::AudioDone]);

        // Nothing playing, nothing to report
        buffer.reset();
        assert!(drain_events(&mut rx).is_empty());
    }

    #[test]
    fn test_empty_frame_does_not_start_playback() {
        let (buffer, mut rx) = ChunkPlaybackBuffer::with_signaling(PlaybackConfig::default());
        buffer.enqueue(frame(0));

        assert!(!buffer.is_playing());
        assert!(drain_events(&mut rx).is_empty());
    }

    #[test]
    fn test_resampling_buffer() {
        let buffer = ChunkPlaybackBuffer::new(PlaybackConfig::at(44100));
        buffer.enqueue(frame(320));

        assert_eq!(buffer.len(), 882); // round(320 * 44100 / 16000)
    }
}
