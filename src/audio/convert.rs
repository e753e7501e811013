// Sample format and rate conversion
//
// Pure functions shared by the capture path (f32 -> PCM16), the playback
// buffers (PCM16 -> f32) and the recording path (16 kHz -> 44.1 kHz).
// None of them keep state between calls.

/// Decode little-endian PCM16 bytes into f32 samples in [-1, 1).
///
/// Each sample `s` maps to `s / 32768`. A trailing odd byte is ignored;
/// callers are expected to have rejected such payloads already.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Encode one f32 sample as PCM16.
///
/// The input is clamped to [-1, 1]; negative values scale by 32768 and
/// positive values by 32767 so both ends of the range are reachable.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

/// Encode f32 samples as PCM16 values.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples.iter().map(|&s| f32_to_i16(s)).collect()
}

/// Serialize PCM16 values as little-endian bytes.
pub fn pcm16_to_bytes(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Linear-interpolation resampler.
///
/// Output length is `round(len * to_rate / from_rate)`. Output sample `i`
/// reads source position `p = i / (to_rate / from_rate)` and interpolates
/// between `input[floor(p)]` and `input[floor(p) + 1]`, treating reads past
/// the end as silence. There is no anti-aliasing filter; this is meant for
/// voice, not music.
///
/// # Panics
///
/// Panics if either rate is zero.
pub fn resample_linear(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    assert!(
        from_rate > 0 && to_rate > 0,
        "sample rates must be positive (from={from_rate}, to={to_rate})"
    );

    if from_rate == to_rate {
        return input.to_vec();
    }

    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = resampled_len(input.len(), from_rate, to_rate);
    let at = |idx: usize| input.get(idx).copied().unwrap_or(0.0) as f64;

    (0..out_len)
        .map(|i| {
            let position = i as f64 / ratio;
            let idx = position.floor() as usize;
            let frac = position - idx as f64;
            let a = at(idx);
            let b = at(idx + 1);
            (a + frac * (b - a)) as f32
        })
        .collect()
}

/// Number of samples `resample_linear` produces for `len` input samples.
pub fn resampled_len(len: usize, from_rate: u32, to_rate: u32) -> usize {
    (len as f64 * to_rate as f64 / from_rate as f64).round() as usize
}

/// Root-mean-square level of a block, used for mic activity detection.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}
