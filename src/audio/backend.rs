use std::path::PathBuf;

use tokio::sync::mpsc;

use super::convert;
use super::output::{AudioOutput, ClockedOutput};
use crate::error::{CallError, Result};

/// PCM16 little-endian mono audio, as carried on the wire.
///
/// Frames are moved, not shared: sending one hands the bytes over. Fanning
/// the same audio out to two consumers takes an explicit [`duplicate`].
///
/// [`duplicate`]: AudioFrame::duplicate
#[derive(Debug, PartialEq, Eq)]
pub struct AudioFrame {
    data: Vec<u8>,
    sample_rate: u32,
}

impl AudioFrame {
    /// Wrap raw PCM16 bytes. Odd-length payloads are not whole samples and
    /// are rejected.
    pub fn from_bytes(data: Vec<u8>, sample_rate: u32) -> Result<Self> {
        if data.len() % 2 != 0 {
            return Err(CallError::MalformedFrame { len: data.len() });
        }
        Ok(Self { data, sample_rate })
    }

    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Self {
        Self {
            data: convert::pcm16_to_bytes(samples),
            sample_rate,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.sample_count() as u64 * 1000 / self.sample_rate as u64
    }

    /// Decode to f32 samples in [-1, 1).
    pub fn to_f32(&self) -> Vec<f32> {
        convert::pcm16_to_f32(&self.data)
    }

    /// Explicit copy for fan-out (audible playback + recording).
    pub fn duplicate(&self) -> Self {
        Self {
            data: self.data.clone(),
            sample_rate: self.sample_rate,
        }
    }
}

/// One block of raw microphone samples at the device's native rate.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedBlock {
    /// Mono f32 samples
    pub samples: Vec<f32>,
    /// Native sample rate in Hz
    pub sample_rate: u32,
}

impl CapturedBlock {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }
}

/// Configuration for a capture backend
#[derive(Debug, Clone)]
pub struct AudioBackendConfig {
    /// Preferred capture rate; devices may deliver their native rate instead
    pub sample_rate: u32,
    /// Samples per delivered block
    pub block_size: usize,
    /// Blocks buffered between the device and the encoder
    pub channel_capacity: usize,
}

impl Default for AudioBackendConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000, // Transcription rate
            block_size: 1024,
            channel_capacity: 64,
        }
    }
}

/// Microphone capture backend.
///
/// Implementations:
/// - File: streams a decoded audio file in real time (scripted calls)
/// - cpal: default input device (`backend-cpal` feature)
#[async_trait::async_trait]
pub trait AudioBackend: Send + Sync {
    /// Start capturing. Denied access surfaces as [`CallError::Permission`].
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>>;

    /// Stop capturing and release the device
    async fn stop(&mut self) -> Result<()>;

    fn is_capturing(&self) -> bool;

    /// Backend name for logging
    fn name(&self) -> &str;
}

/// Where microphone audio comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Default input device
    Microphone,
    /// Audio file played back as if it were a live microphone
    File(PathBuf),
}

/// Where audible playback goes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioSink {
    /// Default output device
    Speaker,
    /// Clock-driven pulls with no device attached
    Headless,
}

/// Audio backend factory
pub struct AudioBackendFactory;

impl AudioBackendFactory {
    pub fn create(source: AudioSource, config: AudioBackendConfig) -> Result<Box<dyn AudioBackend>> {
        match source {
            AudioSource::File(path) => {
                let backend = super::file::FileBackend::open(&path, config)
                    .map_err(|e| CallError::Device(format!("{:#}", e)))?;
                Ok(Box::new(backend))
            }

            AudioSource::Microphone => {
                #[cfg(feature = "backend-cpal")]
                {
                    let backend = super::cpal_backend::CpalMicrophone::new(config)?;
                    Ok(Box::new(backend))
                }

                #[cfg(not(feature = "backend-cpal"))]
                {
                    let _ = config;
                    Err(CallError::Device(
                        "microphone capture requires the backend-cpal feature".to_string(),
                    ))
                }
            }
        }
    }

    pub fn create_output(sink: AudioSink, sample_rate: u32, quantum: usize) -> Result<Box<dyn AudioOutput>> {
        match sink {
            AudioSink::Headless => Ok(Box::new(ClockedOutput::new(sample_rate, quantum))),

            AudioSink::Speaker => {
                #[cfg(feature = "backend-cpal")]
                {
                    let _ = quantum;
                    Ok(Box::new(super::cpal_backend::CpalSpeaker::new(sample_rate)?))
                }

                #[cfg(not(feature = "backend-cpal"))]
                {
                    let _ = (sample_rate, quantum);
                    Err(CallError::Device(
                        "speaker output requires the backend-cpal feature".to_string(),
                    ))
                }
            }
        }
    }
}

/// Opens fresh devices for each call.
pub trait AudioDevices: Send + Sync {
    fn microphone(&self) -> Result<Box<dyn AudioBackend>>;
    fn speaker(&self) -> Result<Box<dyn AudioOutput>>;
}

/// Devices chosen by configuration
#[derive(Debug, Clone)]
pub struct DeviceSet {
    pub source: AudioSource,
    pub sink: AudioSink,
    pub backend: AudioBackendConfig,
    pub playback_rate: u32,
    pub quantum: usize,
}

impl AudioDevices for DeviceSet {
    fn microphone(&self) -> Result<Box<dyn AudioBackend>> {
        AudioBackendFactory::create(self.source.clone(), self.backend.clone())
    }

    fn speaker(&self) -> Result<Box<dyn AudioOutput>> {
        AudioBackendFactory::create_output(self.sink, self.playback_rate, self.quantum)
    }
}
