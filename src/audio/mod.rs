pub mod backend;
pub mod capture;
pub mod convert;
pub mod cue;
pub mod file;
pub mod output;
pub mod playback;

#[cfg(feature = "backend-cpal")]
pub mod cpal_backend;

pub use backend::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioDevices, AudioFrame, AudioSink,
    AudioSource, CapturedBlock, DeviceSet,
};
pub use capture::CaptureEncoder;
pub use cue::Cue;
pub use file::{AudioFile, FileBackend};
pub use output::{AudioOutput, ClockedOutput, OutputMix};
pub use playback::{ChunkPlaybackBuffer, PlaybackConfig, PlaybackEvent};
