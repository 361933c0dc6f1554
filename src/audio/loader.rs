//! # Waveform Loading
//!
//! Decodes audio files into the 16 kHz mono f32 waveform every inference
//! stage consumes. Multi-channel input is downmixed by averaging and other
//! sample rates are linearly resampled.
//!
//! Unreadable or corrupt input surfaces as an invalid-audio error, never as
//! an internal one: a bad upload is the caller's problem.

use std::fs::File;
use std::path::Path;

use tracing::debug;

use crate::error::{AppError, AppResult};

/// Sample rate expected by every downstream model.
pub const SAMPLE_RATE: u32 = 16_000;

/// Decode a WAV file into a 16 kHz mono f32 waveform.
pub fn load_waveform(path: &Path) -> AppResult<Vec<f32>> {
    let mut file = File::open(path)
        .map_err(|e| AppError::InvalidAudio(format!("{}: {}", path.display(), e)))?;
    let (header, data) = wav::read(&mut file)
        .map_err(|e| AppError::InvalidAudio(format!("{}: {}", path.display(), e)))?;

    let samples: Vec<f32> = match data {
        wav::BitDepth::Eight(v) => v
            .into_iter()
            .map(|s| (s as f32 - 128.0) / 128.0)
            .collect(),
        wav::BitDepth::Sixteen(v) => v.into_iter().map(|s| s as f32 / 32768.0).collect(),
        wav::BitDepth::TwentyFour(v) => v
            .into_iter()
            .map(|s| s as f32 / 8_388_608.0)
            .collect(),
        wav::BitDepth::ThirtyTwoFloat(v) => v,
        wav::BitDepth::Empty => {
            return Err(AppError::InvalidAudio(format!(
                "{}: no audio data",
                path.display()
            )))
        }
    };

    if samples.is_empty() || header.channel_count == 0 {
        return Err(AppError::InvalidAudio(format!(
            "{}: no audio data",
            path.display()
        )));
    }

    let mono = downmix(&samples, header.channel_count as usize);
    let waveform = resample(&mono, header.sampling_rate, SAMPLE_RATE);
    debug!(
        path = %path.display(),
        seconds = format!("{:.2}", waveform.len() as f64 / SAMPLE_RATE as f64),
        "Loaded audio file"
    );
    Ok(waveform)
}

/// Write a mono f32 waveform as a WAV file.
pub fn write_waveform(path: &Path, samples: &[f32], sample_rate: u32) -> AppResult<()> {
    let header = wav::Header::new(wav::WAV_FORMAT_IEEE_FLOAT, 1, sample_rate, 32);
    let mut file = File::create(path)?;
    wav::write(header, &wav::BitDepth::ThirtyTwoFloat(samples.to_vec()), &mut file)
        .map_err(|e| AppError::Internal(format!("{}: {}", path.display(), e)))?;
    Ok(())
}

/// Average interleaved channels down to mono.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect()
}

/// Linear-interpolation resample from `from_rate` to `to_rate`.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = from_rate as f64 / to_rate as f64;
    let out_len = ((samples.len() as f64) / ratio).floor() as usize;
    (0..out_len)
        .map(|i| {
            let src = i as f64 * ratio;
            let idx = src as usize;
            let frac = (src - idx as f64) as f32;
            let a = samples[idx];
            let b = samples.get(idx + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}
