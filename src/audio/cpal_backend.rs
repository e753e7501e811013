//! Microphone capture and speaker output through cpal.
//!
//! cpal streams are not `Send`, so each one lives on a dedicated thread that
//! owns it until a stop signal arrives.

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::backend::{AudioBackend, AudioBackendConfig, CapturedBlock};
use super::output::{AudioOutput, OutputMix};
use crate::error::{CallError, Result};

/// Keeps a stream thread alive; dropping it stops the stream.
struct StreamThread {
    stop_tx: std_mpsc::Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("Audio stream thread panicked");
            }
        }
    }
}

/// Downmixes interleaved input and cuts it into fixed-size blocks.
struct BlockCutter {
    channels: usize,
    block_size: usize,
    pending: Vec<f32>,
}

impl BlockCutter {
    fn new(channels: usize, block_size: usize) -> Self {
        Self {
            channels: channels.max(1),
            block_size: block_size.max(1),
            pending: Vec::with_capacity(block_size * 2),
        }
    }

    /// Append one callback's worth of interleaved samples and hand every
    /// complete block to `emit`.
    fn push<T: Copy>(&mut self, data: &[T], convert: impl Fn(T) -> f32, mut emit: impl FnMut(Vec<f32>)) {
        let channels = self.channels;
        self.pending.extend(
            data.chunks_exact(channels)
                .map(|frame| frame.iter().map(|&s| convert(s)).sum::<f32>() / channels as f32),
        );
        while self.pending.len() >= self.block_size {
            emit(self.pending.drain(..self.block_size).collect());
        }
    }
}

fn build_capture_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    block_size: usize,
    tx: mpsc::Sender<CapturedBlock>,
    convert: F,
) -> std::result::Result<cpal::Stream, cpal::BuildStreamError>
where
    T: cpal::SizedSample + Send + 'static,
    F: Fn(T) -> f32 + Send + 'static,
{
    let sample_rate = config.sample_rate.0;
    let mut cutter = BlockCutter::new(config.channels as usize, block_size);

    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            cutter.push(data, &convert, |block| {
                if tx.try_send(CapturedBlock::new(block, sample_rate)).is_err() {
                    warn!("Capture channel full, dropping block");
                }
            });
        },
        |err| error!("Input stream error: {}", err),
        None,
    )
}

/// Default input device
pub struct CpalMicrophone {
    config: AudioBackendConfig,
    stream: Option<StreamThread>,
}

impl CpalMicrophone {
    pub fn new(config: AudioBackendConfig) -> Result<Self> {
        Ok(Self {
            config,
            stream: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioBackend for CpalMicrophone {
    async fn start(&mut self) -> Result<mpsc::Receiver<CapturedBlock>> {
        if self.stream.is_some() {
            return Err(CallError::Device("microphone already capturing".to_string()));
        }

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<u32>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let block_size = self.config.block_size.max(1);

        let thread = std::thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_input_device() else {
                let _ = ready_tx.send(Err(CallError::Permission("no input device available".to_string())));
                return;
            };

            let supported = match device.default_input_config() {
                Ok(c) => c,
                Err(e) => {
                    let _ = ready_tx.send(Err(CallError::Permission(e.to_string())));
                    return;
                }
            };
            let sample_rate = supported.sample_rate().0;
            let sample_format = supported.sample_format();
            let stream_config: StreamConfig = supported.config();

            macro_rules! capture {
                ($sample:ty, $convert:expr) => {
                    build_capture_stream::<$sample, _>(&device, &stream_config, block_size, tx, $convert)
                };
            }

            let stream = match sample_format {
                SampleFormat::I8 => capture!(i8, |s| f32::from(s) / i8::MAX as f32),
                SampleFormat::I16 => capture!(i16, |s| f32::from(s) / i16::MAX as f32),
                SampleFormat::I32 => capture!(i32, |s| s as f32 / i32::MAX as f32),
                SampleFormat::I64 => capture!(i64, |s| s as f32 / i64::MAX as f32),
                SampleFormat::U8 => capture!(u8, |s| (f32::from(s) - 128.0) / 127.0),
                SampleFormat::U16 => capture!(u16, |s| (f32::from(s) - 32768.0) / 32767.0),
                SampleFormat::U32 => capture!(u32, |s| (s as f32 - 2_147_483_648.0) / 2_147_483_647.0),
                SampleFormat::U64 => {
                    capture!(u64, |s| (s as f64 - 9_223_372_036_854_775_808.0) as f32 / i64::MAX as f32)
                }
                SampleFormat::F32 => capture!(f32, |s| s),
                SampleFormat::F64 => capture!(f64, |s| s as f32),
                other => {
                    let _ = ready_tx.send(Err(CallError::Device(format!(
                        "unsupported input sample format {:?}",
                        other
                    ))));
                    return;
                }
            };

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(CallError::Permission(e.to_string())));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CallError::Device(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(sample_rate));
            let _ = stop_rx.recv();
            drop(stream);
        });

        let sample_rate = tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CallError::Device(e.to_string()))?
            .map_err(|_| CallError::Device("input stream thread exited".to_string()))??;

        info!("cpal microphone started at {}Hz", sample_rate);
        self.stream = Some(StreamThread {
            stop_tx,
            thread: Some(thread),
        });
        Ok(rx)
    }

    async fn stop(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.take() {
            tokio::task::spawn_blocking(move || stream.stop())
                .await
                .map_err(|e| CallError::Device(e.to_string()))?;
            info!("cpal microphone stopped");
        }
        Ok(())
    }

    fn is_capturing(&self) -> bool {
        self.stream.is_some()
    }

    fn name(&self) -> &str {
        "cpal-microphone"
    }
}

/// Default output device, mono at the playback rate
pub struct CpalSpeaker {
    sample_rate: u32,
    stream: Option<StreamThread>,
}

impl CpalSpeaker {
    pub fn new(sample_rate: u32) -> Result<Self> {
        Ok(Self {
            sample_rate,
            stream: None,
        })
    }
}

#[async_trait::async_trait]
impl AudioOutput for CpalSpeaker {
    async fn start(&mut self, mix: OutputMix) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }

        let sample_rate = self.sample_rate;
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<()>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::spawn(move || {
            let host = cpal::default_host();
            let Some(device) = host.default_output_device() else {
                let _ = ready_tx.send(Err(CallError::Device("no output device available".to_string())));
                return;
            };

            let config = StreamConfig {
                channels: 1,
                sample_rate: cpal::SampleRate(sample_rate),
                buffer_size: cpal::BufferSize::Default,
            };

            let stream = device.build_output_stream(
                &config,
                move |output: &mut [f32], _: &cpal::OutputCallbackInfo| mix.render(output),
                |err| error!("Output stream error: {}", err),
                None,
            );

            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = ready_tx.send(Err(CallError::Device(e.to_string())));
                    return;
                }
            };
            if let Err(e) = stream.play() {
                let _ = ready_tx.send(Err(CallError::Device(e.to_string())));
                return;
            }

            let _ = ready_tx.send(Ok(()));
            let _ = stop_rx.recv();
            drop(stream);
        });

        tokio::task::spawn_blocking(move || ready_rx.recv())
            .await
            .map_err(|e| CallError::Device(e.to_string()))?
            .map_err(|_| CallError::Device("output stream thread exited".to_string()))??;

        info!("cpal speaker started at {}Hz", sample_rate);
        self.stream = Some(StreamThread {
            stop_tx,
            thread: Some(thread),
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.stop();
            info!("cpal speaker stopped");
        }
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn name(&self) -> &str {
        "cpal-speaker"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collect<T: Copy>(cutter: &mut BlockCutter, data: &[T], convert: impl Fn(T) -> f32) -> Vec<Vec<f32>> {
        let mut blocks = Vec::new();
        cutter.push(data, convert, |block| blocks.push(block));
        blocks
    }

    #[test]
    fn test_i16_stereo_input_is_downmixed_into_blocks() {
        let mut cutter = BlockCutter::new(2, 4);
        let to_f32 = |s: i16| f32::from(s) / i16::MAX as f32;

        // Three stereo frames: not a whole block yet
        let blocks = collect(&mut cutter, &[i16::MAX, 0, i16::MAX, 0, 0, 0], to_f32);
        assert!(blocks.is_empty());

        let blocks = collect(&mut cutter, &[i16::MAX, i16::MAX, 0, 0], to_f32);
        assert_eq!(blocks, vec![vec![0.5, 0.5, 0.0, 1.0]]);
        assert_eq!(cutter.pending, vec![0.0]);
    }

    #[test]
    fn test_unsigned_input_is_centered() {
        let mut cutter = BlockCutter::new(1, 3);
        let blocks = collect(&mut cutter, &[32768u16, 65535, 1], |s| (f32::from(s) - 32768.0) / 32767.0);

        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0][0], 0.0);
        assert!((blocks[0][1] - 1.0).abs() < 1e-6);
        assert!((blocks[0][2] + 1.0).abs() < 1e-6);
    }
}
