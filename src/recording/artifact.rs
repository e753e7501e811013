use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::chunk::ChunkMetadata;
use crate::error::{CallError, Result};

/// What started the recording
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartTrigger {
    /// First synthesized-voice frame arrived
    VoiceFrame,
    /// Microphone level crossed the activity threshold
    MicActivity,
}

/// One finished call recording: the mic and voice mix as a PCM16 mono WAV.
#[derive(Debug, Clone, Serialize)]
pub struct RecordingArtifact {
    pub id: Uuid,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub started_by: StartTrigger,
    pub sample_rate: u32,
    pub chunks: Vec<ChunkMetadata>,
    pub sample_count: usize,
    #[serde(skip)]
    wav: Vec<u8>,
}

impl RecordingArtifact {
    pub fn encode(
        session_id: &str,
        started_by: StartTrigger,
        sample_rate: u32,
        chunks: Vec<ChunkMetadata>,
        samples: &[i16],
    ) -> Result<Self> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };

        let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec)
                .map_err(|e| CallError::Recording(format!("failed to start WAV: {}", e)))?;
            for &sample in samples {
                writer
                    .write_sample(sample)
                    .map_err(|e| CallError::Recording(format!("failed to write sample: {}", e)))?;
            }
            writer
                .finalize()
                .map_err(|e| CallError::Recording(format!("failed to finalize WAV: {}", e)))?;
        }

        Ok(Self {
            id: Uuid::new_v4(),
            session_id: session_id.to_string(),
            created_at: Utc::now(),
            started_by,
            sample_rate,
            chunks,
            sample_count: samples.len(),
            wav: cursor.into_inner(),
        })
    }

    /// The complete WAV file
    pub fn wav_bytes(&self) -> &[u8] {
        &self.wav
    }

    pub fn into_wav_bytes(self) -> Vec<u8> {
        self.wav
    }

    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.sample_count as f64 / self.sample_rate as f64
    }

    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.wav",
            self.session_id,
            self.created_at.format("%Y%m%d_%H%M%S")
        )
    }

    /// Write the WAV into `dir`, creating it if needed.
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir)?;
        let path = dir.join(self.file_name());
        fs::write(&path, &self.wav)?;

        info!(
            "Recording saved: {} ({:.1}s, {} chunks)",
            path.display(),
            self.duration_secs(),
            self.chunks.len()
        );
        Ok(path)
    }
}
