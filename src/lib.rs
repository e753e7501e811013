pub mod audio;
pub mod config;
pub mod error;
pub mod http;
pub mod recording;
pub mod session;
pub mod transport;

pub use audio::{
    AudioBackend, AudioBackendConfig, AudioBackendFactory, AudioDevices, AudioFile, AudioFrame,
    AudioOutput, AudioSink, AudioSource, CaptureEncoder, CapturedBlock, ChunkPlaybackBuffer,
    ClockedOutput, DeviceSet, OutputMix, PlaybackConfig, PlaybackEvent,
};
pub use config::Config;
pub use error::{CallError, Result};
pub use http::{create_router, AppState};
pub use recording::{
    ChunkMetadata, RecordingArtifact, RecordingComposer, RecordingConfig, RecordingPolicy,
    StartTrigger,
};
pub use session::{CallEvent, CallSession, EndReason, SessionConfig, SessionState, SessionStats};
pub use transport::{Connector, ControlMessage, TransportChannel, WebSocketConnector};
