//! # Vocal Source Separation
//!
//! Splits a mixed audio track into an isolated vocal track and the
//! instrumental residual using a pretrained MDX-Net separation model run
//! through onnxruntime. Used as an optional pre-processing step to improve
//! recognition accuracy on music-heavy input.
//!
//! The separator writes both tracks as fresh temp WAV files and does not
//! delete its own outputs; the invoking engine owns their lifetime. The
//! returned [`SeparatedTracks`] guard removes whatever is still on disk when
//! dropped, tolerating files that were already deleted.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use ndarray::Array3;
use ort::session::Session;
use ort::value::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::audio::loader;
use crate::error::{AppError, AppResult};
use crate::transcription::align::create_session;

/// Fixed separation model file expected under the download root.
pub const SEPARATION_MODEL_FILE: &str = "UVR-MDX-NET-Voc_FT.onnx";

/// Waveform window pushed through the separation model per forward pass.
const WINDOW_SAMPLES: usize = 10 * loader::SAMPLE_RATE as usize;

/// The two output files of one separation call.
///
/// Dropping the guard removes any file still present, so the tracks cannot
/// outlive the request even on error paths.
pub struct SeparatedTracks {
    pub vocals: PathBuf,
    pub instrumental: PathBuf,
}

impl SeparatedTracks {
    /// Best-effort removal of both tracks; already-gone files are not an
    /// error.
    pub fn cleanup(&self) {
        for path in [&self.vocals, &self.instrumental] {
            let _ = fs::remove_file(path);
        }
    }
}

impl Drop for SeparatedTracks {
    fn drop(&mut self) {
        self.cleanup();
    }
}

/// Source separation seam consumed by the engine.
pub trait VocalSeparator: Send + Sync {
    /// Split `input` into a vocal track and an instrumental track, each a
    /// newly created temporary file.
    fn separate(&self, input: &Path) -> AppResult<SeparatedTracks>;
}

/// Production separator backed by the fixed MDX-Net ONNX model.
///
/// Loaded once at startup; not part of the per-model cache. The session is
/// behind a mutex because onnxruntime inference takes `&mut`.
pub struct MdxSeparator {
    session: Mutex<Session>,
    spool_dir: PathBuf,
}

impl MdxSeparator {
    /// Load the separation model from `<download_root>/UVR-MDX-NET-Voc_FT.onnx`.
    pub fn load(download_root: &str, spool_dir: impl Into<PathBuf>) -> AppResult<Self> {
        let model_path = Path::new(download_root).join(SEPARATION_MODEL_FILE);
        let session = create_session(&model_path)
            .map_err(|e| AppError::ModelLoad(format!("{}: {}", model_path.display(), e)))?;
        info!(model = SEPARATION_MODEL_FILE, "Separation model loaded");
        Ok(Self {
            session: Mutex::new(session),
            spool_dir: spool_dir.into(),
        })
    }

    /// Run the model over the waveform in fixed windows, producing the
    /// vocal estimate at the same length as the input.
    fn vocals_estimate(&self, samples: &[f32]) -> AppResult<Vec<f32>> {
        let mut session = self.session.lock().unwrap();
        let mut vocals = Vec::with_capacity(samples.len());

        for window in samples.chunks(WINDOW_SAMPLES) {
            let mut padded = window.to_vec();
            padded.resize(WINDOW_SAMPLES, 0.0);

            let input = Array3::from_shape_vec((1, 1, WINDOW_SAMPLES), padded)
                .map_err(|e| AppError::Separation(e.to_string()))?;
            let input = Value::from_array(input).map_err(|e| AppError::Separation(e.to_string()))?;
            let outputs = session
                .run(ort::inputs!["input" => input])
                .map_err(|e| AppError::Separation(e.to_string()))?;
            let (_, data) = outputs["output"]
                .try_extract_tensor::<f32>()
                .map_err(|e| AppError::Separation(e.to_string()))?;

            vocals.extend_from_slice(&data[..window.len().min(data.len())]);
        }

        if vocals.len() != samples.len() {
            return Err(AppError::Separation(format!(
                "model produced {} samples for {} input samples",
                vocals.len(),
                samples.len()
            )));
        }
        Ok(vocals)
    }
}

impl VocalSeparator for MdxSeparator {
    fn separate(&self, input: &Path) -> AppResult<SeparatedTracks> {
        let samples = loader::load_waveform(input)?;
        let vocals = self.vocals_estimate(&samples)?;
        let instrumental: Vec<f32> = samples
            .iter()
            .zip(&vocals)
            .map(|(mix, voc)| mix - voc)
            .collect();

        let tracks = SeparatedTracks {
            vocals: self.spool_dir.join(format!("vocals-{}.wav", Uuid::new_v4())),
            instrumental: self
                .spool_dir
                .join(format!("instrumental-{}.wav", Uuid::new_v4())),
        };
        loader::write_waveform(&tracks.vocals, &vocals, loader::SAMPLE_RATE)?;
        loader::write_waveform(&tracks.instrumental, &instrumental, loader::SAMPLE_RATE)?;

        debug!(
            vocals = %tracks.vocals.display(),
            instrumental = %tracks.instrumental.display(),
            "Audio separation completed"
        );
        Ok(tracks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracks_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let vocals = dir.path().join("vocals.wav");
        let instrumental = dir.path().join("instrumental.wav");
        fs::write(&vocals, b"v").unwrap();
        fs::write(&instrumental, b"i").unwrap();

        drop(SeparatedTracks {
            vocals: vocals.clone(),
            instrumental: instrumental.clone(),
        });

        assert!(!vocals.exists());
        assert!(!instrumental.exists());
    }

    #[test]
    fn test_cleanup_tolerates_missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let tracks = SeparatedTracks {
            vocals: dir.path().join("gone-v.wav"),
            instrumental: dir.path().join("gone-i.wav"),
        };
        tracks.cleanup();
        // drop runs a second cleanup; neither may panic
    }
}
