use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::debug;

use super::file::AudioFile;
use super::playback::ChunkPlaybackBuffer;

/// A short local sound (ringtone, connect beep) at the playback rate.
#[derive(Debug, Clone, PartialEq)]
pub struct Cue {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Cue {
    pub fn load(path: &Path, sample_rate: u32) -> Result<Self> {
        let audio = AudioFile::open(path)?;
        Ok(Self {
            samples: audio.samples_at(sample_rate),
            sample_rate,
        })
    }

    pub fn from_samples(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }

    /// Queue the cue once.
    pub fn play(&self, buffer: &ChunkPlaybackBuffer) {
        buffer.enqueue_samples(&self.samples, self.sample_rate);
    }

    /// Keep the cue looping into `buffer` until the task is aborted.
    pub fn spawn_loop(self: Arc<Self>, buffer: ChunkPlaybackBuffer) -> JoinHandle<()> {
        // Refill while ~20ms still queued so the loop has no gap
        let low_water = (self.sample_rate / 50) as usize;
        let poll = Duration::from_millis(10);

        tokio::spawn(async move {
            if self.samples.is_empty() {
                return;
            }
            loop {
                if buffer.len() <= low_water {
                    debug!("Looping cue ({} samples)", self.samples.len());
                    self.play(&buffer);
                }
                sleep(poll).await;
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::playback::PlaybackConfig;

    #[test]
    fn test_cue_duration() {
        let cue = Cue::from_samples(vec![0.1; 8000], 16000);
        assert_eq!(cue.duration(), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_cue_loop_refills() {
        let buffer = ChunkPlaybackBuffer::new(PlaybackConfig::at(16000));
        let cue = Arc::new(Cue::from_samples(vec![0.1; 400], 16000));

        let task = cue.spawn_loop(buffer.clone());
        sleep(Duration::from_millis(30)).await;
        buffer.pull(400);
        sleep(Duration::from_millis(30)).await;
        task.abort();

        assert!(buffer.len() >= 400, "loop should have refilled the buffer");
    }
}
