use anyhow::{Context, Result};
use std::fs::File;
use std::path::Path;
use std::time::Duration;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, CapturedBlock};
use super::convert;
use crate::error::{CallError, Result as CallResult};

/// A decoded audio file, downmixed to mono f32.
pub struct AudioFile {
    pub path: String,
    pub duration_seconds: f64,
    pub sample_rate: u32,
    /// Channel count of the source before downmixing
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl AudioFile {
    /// Decode any format symphonia understands (WAV, MP3, FLAC, OGG, ...).
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening audio file: {}", path.display());

        let file = File::open(path)
            .with_context(|| format!("Failed to open audio file: {}", path.display()))?;
        let stream = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
            .context("Unsupported or corrupt audio file")?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .context("No decodable audio track")?;
        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let sample_rate = codec_params.sample_rate.context("Unknown sample rate")?;
        let channels = codec_params.channels.map(|c| c.count()).unwrap_or(1).max(1);

        let mut decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .context("Failed to create decoder")?;

        let mut interleaved: Vec<f32> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(e).context("Failed to read audio packet"),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, *decoded.spec());
                    buffer.copy_interleaved_ref(decoded);
                    interleaved.extend_from_slice(buffer.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    warn!("Skipping undecodable packet: {}", e);
                }
                Err(e) => return Err(e).context("Failed to decode audio"),
            }
        }

        let samples: Vec<f32> = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks_exact(channels)
                .map(|frame| frame.iter().sum::<f32>() / channels as f32)
                .collect()
        };

        let duration_seconds = samples.len() as f64 / sample_rate as f64;

        info!(
            "Audio file loaded: {:.1}s, {}Hz, {} channels, {} samples",
            duration_seconds,
            sample_rate,
            channels,
            samples.len()
        );

        Ok(Self {
            path: path.display().to_string(),
            duration_seconds,
            sample_rate,
            channels: channels as u16,
            samples,
        })
    }

    /// Mono samples at `target_rate`.
    pub fn samples_at(&self, target_rate: u32) -> Vec<f32> {
        convert::resample_linear(&self.samples, self.sample_rate, target_rate)
    }
}

/// Plays a file as if it were a live microphone.
///
/// Blocks are delivered at real-time pace; once the file runs out the
/// backend keeps producing silence until stopped, like an idle mic.
pub struct FileBackend {
    name: String,
    samples: Vec<f32>,
    sample_rate: u32,
    config: AudioBackendConfig,
    task: Option<JoinHandle<()>>,
}

impl FileBackend {
    pub fn open(path: &Path, config: AudioBackendConfig) -> Result<Self> {
        let audio = AudioFile::open(path)?;
        Ok(Self {
            name: format!("file:{}", path.display()),
            samples: audio.samples_at(config.sample_rate),
            sample_rate: config.sample_rate,
            config,
            task: None,
        })
    }

    /// Backend over samples already in memory
    pub fn from_samples(samples: Vec<f32>, config: AudioBackendConfig) -> Self {
        Self {
            name: "memory".to_string(),
            samples,
            sample_rate: config.sample_rate,
            config,
            task: None,
        }
    }
}

#[async_trait::async_trait]
impl AudioBackend for FileBackend {
    async fn start(&mut self) -> CallResult<mpsc::Receiver<CapturedBlock>> {
        if self.task.is_some() {
            return Err(CallError::Device(format!("{} is already capturing", self.name)));
        }

        let block_size = self.config.block_size.max(1);
        let sample_rate = self.sample_rate;
        let samples = self.samples.clone();
        let period = Duration::from_secs_f64(block_size as f64 / sample_rate as f64);
        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));

        info!(
            "{}: streaming {} samples in blocks of {}",
            self.name,
            samples.len(),
            block_size
        );

        self.task = Some(tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut position = 0;

            loop {
                ticker.tick().await;

                let mut block = vec![0.0f32; block_size];
                if position < samples.len() {
                    let end = (position + block_size).min(samples.len());
                    block[..end - position].copy_from_slice(&samples[position..end]);
                    position = end;
                }

                if tx.send(CapturedBlock::new(block, sample_rate)).await.is_err() {
                    debug!("File capture receiver dropped");
                    break;
                }
            }
        }));

        Ok(rx)
    }

    async fn stop(&mut self) -> CallResult<()> {
        if let Some(task) = self.task.take() {
            task.abort();
            info!("{}: capture stopped", self.name);
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.task.is_some()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
