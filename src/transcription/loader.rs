//! # Hub Model Loader
//!
//! Production [`ModelLoader`]: builds Whisper and alignment pipelines from
//! artifacts fetched into the configured download root, bound to the
//! process-wide device and numeric precision.

use candle_core::{DType, Device};
use std::time::Instant;
use tracing::{debug, error, info};

use crate::device::ComputeType;
use crate::error::AppResult;
use crate::transcription::align::CtcAligner;
use crate::transcription::pipeline::{ForcedAligner, ModelLoader, SpeechRecognizer};
use crate::transcription::types::{Language, ModelId};
use crate::transcription::whisper::WhisperPipeline;

/// Loads model artifacts from the HuggingFace hub cache directory.
pub struct HubModelLoader {
    device: Device,
    dtype: DType,
    download_root: String,
}

impl HubModelLoader {
    pub fn new(device: Device, compute_type: ComputeType, download_root: impl Into<String>) -> Self {
        Self {
            device,
            dtype: compute_type.to_dtype(),
            download_root: download_root.into(),
        }
    }
}

impl ModelLoader for HubModelLoader {
    fn load_recognizer(&self, model: ModelId) -> AppResult<Box<dyn SpeechRecognizer>> {
        debug!(model = %model, "Loading ASR model");
        let started = Instant::now();
        match WhisperPipeline::load(model, self.device.clone(), self.dtype, &self.download_root) {
            Ok(pipeline) => {
                info!(
                    model = %model,
                    elapsed_s = format!("{:.2}", started.elapsed().as_secs_f64()),
                    "ASR model loaded"
                );
                Ok(Box::new(pipeline))
            }
            Err(e) => {
                error!(model = %model, error = %e, "Failed to load ASR model");
                Err(e)
            }
        }
    }

    fn load_aligner(&self, language: Language) -> AppResult<Box<dyn ForcedAligner>> {
        debug!(language = %language, "Loading align model");
        match CtcAligner::load(language, &self.download_root) {
            Ok(aligner) => {
                info!(language = %language, "Align model loaded");
                Ok(Box::new(aligner))
            }
            Err(e) => {
                error!(language = %language, error = %e, "Failed to load align model");
                Err(e)
            }
        }
    }
}
