use serde::{Deserialize, Serialize};
use tracing::debug;

/// Chunk configuration
#[derive(Debug, Clone)]
pub struct ChunkConfig {
    /// Duration of each chunk in milliseconds (default: 1000)
    pub chunk_duration_ms: u64,
    /// Sample rate of the recorded mix
    pub sample_rate: u32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_duration_ms: 1000,
            sample_rate: 44100,
        }
    }
}

impl ChunkConfig {
    fn samples_per_chunk(&self) -> usize {
        ((self.sample_rate as u64 * self.chunk_duration_ms) / 1000).max(1) as usize
    }
}

/// Metadata for a single chunk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Chunk number (0-indexed)
    pub chunk_index: usize,
    /// Start time in milliseconds since recording started
    pub start_ms: u64,
    /// End time in milliseconds since recording started
    pub end_ms: u64,
    pub sample_rate: u32,
    /// Number of samples in this chunk
    pub sample_count: usize,
}

/// Chunked in-memory recorder.
///
/// Accumulates the PCM16 mix and closes a chunk every `chunk_duration_ms`;
/// the chunk list is the timeline of the final artifact.
pub struct ChunkedRecorder {
    config: ChunkConfig,
    samples: Vec<i16>,
    chunks: Vec<ChunkMetadata>,
    current_start: usize,
}

impl ChunkedRecorder {
    pub fn new(config: ChunkConfig) -> Self {
        debug!(
            "Chunked recorder initialized ({}Hz, {}ms chunks)",
            config.sample_rate, config.chunk_duration_ms
        );
        Self {
            config,
            samples: Vec::new(),
            chunks: Vec::new(),
            current_start: 0,
        }
    }

    pub fn write(&mut self, pcm: &[i16]) {
        let per_chunk = self.config.samples_per_chunk();
        let mut rest = pcm;

        while !rest.is_empty() {
            let in_chunk = self.samples.len() - self.current_start;
            let take = (per_chunk - in_chunk).min(rest.len());
            self.samples.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.samples.len() - self.current_start == per_chunk {
                self.close_chunk();
            }
        }
    }

    fn close_chunk(&mut self) {
        let end = self.samples.len();
        if end == self.current_start {
            return;
        }

        let meta = ChunkMetadata {
            chunk_index: self.chunks.len(),
            start_ms: self.position_ms(self.current_start),
            end_ms: self.position_ms(end),
            sample_rate: self.config.sample_rate,
            sample_count: end - self.current_start,
        };
        debug!(
            "Chunk {} complete: {:.1}s - {:.1}s ({} samples)",
            meta.chunk_index,
            meta.start_ms as f64 / 1000.0,
            meta.end_ms as f64 / 1000.0,
            meta.sample_count
        );
        self.chunks.push(meta);
        self.current_start = end;
    }

    fn position_ms(&self, sample: usize) -> u64 {
        sample as u64 * 1000 / self.config.sample_rate.max(1) as u64
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Close the partial chunk and hand back everything recorded
    pub fn finish(mut self) -> (Vec<ChunkMetadata>, Vec<i16>) {
        self.close_chunk();
        (self.chunks, self.samples)
    }
}
