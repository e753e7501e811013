pub mod artifact;
pub mod chunk;
pub mod composer;

pub use artifact::{RecordingArtifact, StartTrigger};
pub use chunk::{ChunkConfig, ChunkMetadata, ChunkedRecorder};
pub use composer::{RecordingComposer, RecordingConfig, RecordingPolicy};
