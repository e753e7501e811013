// Integration tests for audio file decoding
//
// Fixtures are generated on the fly with hound so the tests carry no binary
// assets.

use std::path::Path;

use anyhow::Result;
use voice_call::audio::{AudioFile, Cue};

fn write_wav(path: &Path, sample_rate: u32, channels: u16, frames: &[i16]) -> Result<()> {
    let spec = hound::WavSpec {
        channels,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)?;
    for &sample in frames {
        writer.write_sample(sample)?;
    }
    writer.finalize()?;
    Ok(())
}

#[test]
fn test_audio_file_open() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("tone.wav");
    write_wav(&path, 16000, 1, &vec![8192; 8000])?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.sample_rate, 16000);
    assert_eq!(audio.channels, 1);
    assert_eq!(audio.samples.len(), 8000);
    assert!((audio.duration_seconds - 0.5).abs() < 1e-6);
    assert!(audio.path.contains("tone.wav"));
    assert!(audio.samples.iter().all(|&s| (s - 0.25).abs() < 1e-3));
    Ok(())
}

#[test]
fn test_audio_file_downmixes_stereo() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("stereo.wav");
    // Left at +0.5, right silent
    let interleaved: Vec<i16> = (0..4410).flat_map(|_| [16384i16, 0]).collect();
    write_wav(&path, 44100, 2, &interleaved)?;

    let audio = AudioFile::open(&path)?;

    assert_eq!(audio.channels, 2);
    assert_eq!(audio.samples.len(), 4410);
    assert!(audio.samples.iter().all(|&s| (s - 0.25).abs() < 1e-3));
    Ok(())
}

#[test]
fn test_audio_file_resamples_on_request() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("cd.wav");
    write_wav(&path, 44100, 1, &vec![0; 44100])?;

    let audio = AudioFile::open(&path)?;
    assert_eq!(audio.samples_at(16000).len(), 16000);
    assert_eq!(audio.samples_at(44100).len(), 44100);
    Ok(())
}

#[test]
fn test_audio_file_missing() {
    assert!(AudioFile::open("/nonexistent/file.wav").is_err());
}

#[test]
fn test_audio_file_not_audio() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("notes.wav");
    std::fs::write(&path, b"definitely not a wav file")?;

    assert!(AudioFile::open(&path).is_err());
    Ok(())
}

#[test]
fn test_cue_loads_at_playback_rate() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("beep.wav");
    write_wav(&path, 8000, 1, &vec![1000; 800])?;

    let cue = Cue::load(&path, 16000)?;
    assert_eq!(cue.sample_rate(), 16000);
    assert_eq!(cue.samples().len(), 1600);
    assert_eq!(cue.duration().as_millis(), 100);
    Ok(())
}
