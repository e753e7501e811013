use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use super::playback::ChunkPlaybackBuffer;
use crate::error::Result;

#[derive(Debug, Default)]
struct MixState {
    sources: Vec<ChunkPlaybackBuffer>,
    scratch: Vec<f32>,
}

/// The set of playback buffers currently wired to the audible output.
///
/// Devices only ever call [`render`](OutputMix::render); the session decides
/// what is connected.
#[derive(Debug, Clone, Default)]
pub struct OutputMix {
    state: Arc<Mutex<MixState>>,
}

impl OutputMix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, source: ChunkPlaybackBuffer) {
        self.lock().sources.push(source);
    }

    pub fn disconnect_all(&self) {
        let mut state = self.lock();
        let count = state.sources.len();
        state.sources.clear();
        debug!("Output mix disconnected {} sources", count);
    }

    pub fn source_count(&self) -> usize {
        self.lock().sources.len()
    }

    /// Sum one pull from every connected source into `out`, clamped to
    /// [-1, 1]. Silence when nothing is connected.
    pub fn render(&self, out: &mut [f32]) {
        out.fill(0.0);

        let mut state = self.lock();
        let MixState { sources, scratch } = &mut *state;
        if scratch.len() < out.len() {
            scratch.resize(out.len(), 0.0);
        }
        let scratch = &mut scratch[..out.len()];

        for source in sources.iter() {
            source.pull_into(scratch);
            for (mixed, sample) in out.iter_mut().zip(scratch.iter()) {
                *mixed += *sample;
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
    }

    fn lock(&self) -> MutexGuard<'_, MixState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Audible output device.
///
/// Implementations pull from the mix on their own clock:
/// - `ClockedOutput`: tokio interval, no hardware (headless runs, tests)
/// - cpal: default output device (`backend-cpal` feature)
#[async_trait::async_trait]
pub trait AudioOutput: Send {
    /// Begin pulling from `mix`. Suspends while the device opens.
    async fn start(&mut self, mix: OutputMix) -> Result<()>;

    /// Stop pulling and release the device. Safe to call more than once.
    fn stop(&mut self);

    fn sample_rate(&self) -> u32;

    /// Output name for logging
    fn name(&self) -> &str;
}

/// Output that renders fixed quanta on a tokio interval and discards them,
/// optionally forwarding each rendered block to a tap.
pub struct ClockedOutput {
    sample_rate: u32,
    quantum: usize,
    tap: Option<mpsc::UnboundedSender<Vec<f32>>>,
    task: Option<JoinHandle<()>>,
}

impl ClockedOutput {
    pub fn new(sample_rate: u32, quantum: usize) -> Self {
        Self {
            sample_rate,
            quantum: quantum.max(1),
            tap: None,
            task: None,
        }
    }

    /// Forward every rendered block to `tap`
    pub fn with_tap(mut self, tap: mpsc::UnboundedSender<Vec<f32>>) -> Self {
        self.tap = Some(tap);
        self
    }

    fn period(&self) -> Duration {
        Duration::from_secs_f64(self.quantum as f64 / self.sample_rate.max(1) as f64)
    }
}

#[async_trait::async_trait]
impl AudioOutput for ClockedOutput {
    async fn start(&mut self, mix: OutputMix) -> Result<()> {
        if self.task.is_some() {
            return Ok(());
        }

        let period = self.period();
        let quantum = self.quantum;
        let tap = self.tap.clone();

        info!(
            "Clocked output started: {}Hz, {} samples every {:?}",
            self.sample_rate, quantum, period
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Burst);
            let mut block = vec![0.0f32; quantum];

            loop {
                ticker.tick().await;
                mix.render(&mut block);
                if let Some(tap) = &tap {
                    if tap.send(block.clone()).is_err() {
                        debug!("Output tap closed");
                    }
                }
            }
        }));

        Ok(())
    }

    fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("Clocked output stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "clocked"
    }
}

impl Drop for ClockedOutput {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::backend::AudioFrame;
    use crate::audio::playback::PlaybackConfig;

    #[test]
    fn test_render_without_sources_is_silence() {
        let mix = OutputMix::new();
        let mut out = [0.5f32; 64];
        mix.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_render_sums_and_clamps() {
        let mix = OutputMix::new();
        let a = ChunkPlaybackBuffer::new(PlaybackConfig::default());
        let b = ChunkPlaybackBuffer::new(PlaybackConfig::default());
        a.enqueue(AudioFrame::from_samples(&[16384, 30000], 16000));
        b.enqueue(AudioFrame::from_samples(&[8192, 30000], 16000));
        mix.connect(a.clone());
        mix.connect(b.clone());

        let mut out = [0.0f32; 4];
        mix.render(&mut out);

        assert_eq!(out[0], 0.75);
        assert_eq!(out[1], 1.0);
        assert_eq!(out[2], 0.0);
        assert!(a.is_empty() && b.is_empty());
    }

    #[test]
    fn test_disconnect_all_stops_draining() {
        let mix = OutputMix::new();
        let source = ChunkPlaybackBuffer::new(PlaybackConfig::default());
        source.enqueue(AudioFrame::from_samples(&[100; 10], 16000));
        mix.connect(source.clone());
        mix.disconnect_all();

        let mut out = [0.0f32; 10];
        mix.render(&mut out);

        assert_eq!(mix.source_count(), 0);
        assert_eq!(source.len(), 10);
    }

    #[tokio::test]
    async fn test_clocked_output_pulls_on_its_own() {
        let (tap_tx, mut tap_rx) = mpsc::unbounded_channel();
        let mut output = ClockedOutput::new(16000, 160).with_tap(tap_tx);
        let mix = OutputMix::new();
        let source = ChunkPlaybackBuffer::new(PlaybackConfig::default());
        source.enqueue(AudioFrame::from_samples(&[16384; 160], 16000));
        mix.connect(source.clone());

        output.start(mix).await.unwrap();
        let block = tap_rx.recv().await.unwrap();
        output.stop();

        assert_eq!(block.len(), 160);
        assert_eq!(block[0], 0.5);
        assert!(source.is_empty());
    }
}
