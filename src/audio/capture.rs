use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioFrame, CapturedBlock};
use super::convert;
use crate::error::Result;

/// Turns microphone blocks into PCM16 frames at the transcription rate.
///
/// Owns the capture backend for the lifetime of a call. Each block becomes
/// exactly one frame; there is no buffering beyond the block in flight.
pub struct CaptureEncoder {
    backend: Box<dyn AudioBackend>,
    target_rate: u32,
    task: Option<JoinHandle<()>>,
    capturing: bool,
}

impl CaptureEncoder {
    pub fn new(backend: Box<dyn AudioBackend>, target_rate: u32) -> Self {
        Self {
            backend,
            target_rate,
            task: None,
            capturing: false,
        }
    }

    /// Resample a block to `target_rate` if needed and encode it as PCM16.
    pub fn encode(block: &CapturedBlock, target_rate: u32) -> AudioFrame {
        let pcm = if block.sample_rate == target_rate {
            convert::f32_to_pcm16(&block.samples)
        } else {
            let resampled = convert::resample_linear(&block.samples, block.sample_rate, target_rate);
            convert::f32_to_pcm16(&resampled)
        };
        AudioFrame::from_samples(&pcm, target_rate)
    }

    /// Start the microphone and forward encoded frames to `frames`.
    ///
    /// When `monitor` is set, every raw block is copied there first (the
    /// recording mix wants the native-rate signal).
    pub async fn start(
        &mut self,
        frames: mpsc::UnboundedSender<AudioFrame>,
        monitor: Option<mpsc::UnboundedSender<CapturedBlock>>,
    ) -> Result<()> {
        if self.capturing {
            warn!("Capture already started on {}", self.backend.name());
            return Ok(());
        }

        let mut blocks = self.backend.start().await?;
        self.capturing = true;

        let target_rate = self.target_rate;
        info!(
            "Capture encoder started on {} ({}Hz PCM16 out)",
            self.backend.name(),
            target_rate
        );

        self.task = Some(tokio::spawn(async move {
            let mut encoded = 0u64;

            while let Some(block) = blocks.recv().await {
                if let Some(monitor) = &monitor {
                    let _ = monitor.send(block.clone());
                }

                let frame = Self::encode(&block, target_rate);
                if frames.send(frame).is_err() {
                    debug!("Frame receiver dropped, capture loop exiting");
                    break;
                }
                encoded += 1;
            }

            debug!("Capture loop finished after {} frames", encoded);
        }));

        Ok(())
    }

    /// Stop the encoder and release the microphone. Only the first call
    /// after a successful start touches the device.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(task) = self.task.take() {
            task.abort();
        }

        if !self.capturing {
            return Ok(());
        }
        self.capturing = false;

        info!("Releasing microphone {}", self.backend.name());
        self.backend.stop().await
    }

    pub fn is_capturing(&self) -> bool {
        self.capturing
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }
}
