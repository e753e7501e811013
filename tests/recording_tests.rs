// Integration tests for call recording
//
// These tests verify the composer start policies, chunking and that the
// saved artifact is a playable WAV.

use std::io::Cursor;

use anyhow::Result;
use voice_call::audio::{AudioFrame, CapturedBlock};
use voice_call::recording::{RecordingComposer, RecordingConfig, RecordingPolicy, StartTrigger};

fn manual(config: RecordingConfig) -> RecordingComposer {
    RecordingComposer::new("call-test", config).without_clock()
}

#[test]
fn test_artifact_saved_to_disk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let mut composer = manual(RecordingConfig::default());

    // Half a second of voice at 16kHz
    for _ in 0..25 {
        composer.ingest_voice(AudioFrame::from_samples(&[4096; 320], 16000));
    }
    let artifact = composer.stop()?.expect("recording");

    let path = artifact.save(&dir.path().join("recordings"))?;
    assert!(path.exists());
    let name = path.file_name().unwrap().to_str().unwrap();
    assert!(name.starts_with("call-test-"));
    assert!(name.ends_with(".wav"));

    let reader = hound::WavReader::open(&path)?;
    assert_eq!(reader.spec().sample_rate, 44100);
    assert_eq!(reader.spec().channels, 1);
    assert_eq!(reader.len() as usize, artifact.sample_count);
    assert!((artifact.duration_secs() - 0.5).abs() < 0.02);
    Ok(())
}

#[test]
fn test_chunks_cover_whole_recording() -> Result<()> {
    let mut composer = manual(RecordingConfig {
        chunk_duration_ms: 100,
        ..RecordingConfig::default()
    });

    for _ in 0..25 {
        composer.ingest_voice(AudioFrame::from_samples(&[4096; 320], 16000));
    }
    let artifact = composer.stop()?.expect("recording");

    assert!(artifact.chunks.len() >= 5);
    assert_eq!(artifact.chunks[0].start_ms, 0);
    assert_eq!(artifact.chunks[0].end_ms, 100);
    for pair in artifact.chunks.windows(2) {
        assert_eq!(pair[0].end_ms, pair[1].start_ms);
        assert_eq!(pair[1].chunk_index, pair[0].chunk_index + 1);
    }
    let total: usize = artifact.chunks.iter().map(|c| c.sample_count).sum();
    assert_eq!(total, artifact.sample_count);
    Ok(())
}

#[test]
fn test_mic_before_voice_is_not_recorded() -> Result<()> {
    let mut composer = manual(RecordingConfig::default());

    composer.ingest_mic(&CapturedBlock::new(vec![0.5; 4410], 44100));
    composer.ingest_voice(AudioFrame::from_samples(&[0; 160], 16000));
    let artifact = composer.stop()?.expect("recording");

    let mut reader = hound::WavReader::new(Cursor::new(artifact.wav_bytes()))?;
    let samples: Vec<i16> = reader.samples::<i16>().collect::<std::result::Result<_, _>>()?;
    assert!(samples.iter().all(|&s| s == 0));
    Ok(())
}

#[test]
fn test_mic_activity_starts_recording_and_is_mixed() -> Result<()> {
    let mut composer = manual(RecordingConfig {
        policy: RecordingPolicy::OnVoiceOrMic,
        ..RecordingConfig::default()
    });

    // Native 48kHz mic block is resampled to the recording rate
    let trigger = composer.ingest_mic(&CapturedBlock::new(vec![0.5; 4800], 48000));
    assert_eq!(trigger, Some(StartTrigger::MicActivity));

    let artifact = composer.stop()?.expect("recording");
    assert_eq!(artifact.started_by, StartTrigger::MicActivity);
    assert!(artifact.sample_count >= 4410);

    let mut reader = hound::WavReader::new(Cursor::new(artifact.wav_bytes()))?;
    let first: i16 = reader.samples::<i16>().next().expect("sample")?;
    assert_eq!(first, 16383);
    Ok(())
}
