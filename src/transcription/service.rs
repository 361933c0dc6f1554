//! # Transcription Service Façade
//!
//! Request-scoped adapter between the HTTP layer and the engine: takes the
//! uploaded payload instead of a path, materializes it to a scoped temp file
//! (deleted on every exit path), delegates to the engine, and dispatches
//! formatting. Holds no state beyond the engine and cache references.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::info;

use crate::audio::separator::MdxSeparator;
use crate::audio::ScopedUpload;
use crate::config::AppConfig;
use crate::device::{create_compute_type_from_string, create_device_from_string, DeviceManager};
use crate::error::AppResult;
use crate::transcription::cache::{CacheStats, ModelCache};
use crate::transcription::engine::TranscriptionEngine;
use crate::transcription::format::{format_transcript, TranscriptionResponse};
use crate::transcription::loader::HubModelLoader;
use crate::transcription::pipeline::DecodeParams;
use crate::transcription::types::{Language, ModelId, ResultFormat};

/// Request-scoped transcription options, parsed by the HTTP layer.
/// Discarded at end of request, never persisted.
#[derive(Debug, Clone)]
pub struct TranscribeRequest {
    pub model: ModelId,
    pub language: Option<Language>,
    pub format: ResultFormat,
    pub align_mode: bool,
    pub audio_preprocessing: bool,
}

impl Default for TranscribeRequest {
    fn default() -> Self {
        Self {
            model: ModelId::Small,
            language: None,
            format: ResultFormat::Full,
            align_mode: true,
            audio_preprocessing: true,
        }
    }
}

/// Binds one engine instance for the HTTP layer.
pub struct TranscriptionService {
    engine: TranscriptionEngine,
    cache: Arc<ModelCache>,
    preload_models: Vec<ModelId>,
    spool_dir: PathBuf,
}

impl TranscriptionService {
    /// Assemble a service from explicit collaborators (dependency injection
    /// point used by tests).
    pub fn new(
        engine: TranscriptionEngine,
        cache: Arc<ModelCache>,
        preload_models: Vec<ModelId>,
        spool_dir: PathBuf,
    ) -> Self {
        Self {
            engine,
            cache,
            preload_models,
            spool_dir,
        }
    }

    /// Wire the production stack from configuration: device and precision
    /// selection, hub loader, model cache, separator, engine.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let settings = &config.transcription;
        let device = create_device_from_string(&settings.device);
        let compute_type = create_compute_type_from_string(&settings.compute_type);
        info!(
            device = DeviceManager::get_device_info(&device),
            compute_type = ?compute_type,
            download_root = %settings.download_root,
            "Constructing transcription service"
        );

        let loader = HubModelLoader::new(device.clone(), compute_type, &settings.download_root);
        let cache = Arc::new(ModelCache::new(Box::new(loader), device));
        let separator = Arc::new(MdxSeparator::load(
            &settings.download_root,
            settings.spool_dir.clone(),
        )?);
        let engine = TranscriptionEngine::new(
            Arc::clone(&cache),
            separator,
            DecodeParams {
                batch_size: settings.batch_size,
                chunk_size: settings.chunk_size,
            },
        );

        Ok(Self::new(
            engine,
            cache,
            config.preload_model_ids(),
            PathBuf::from(&settings.spool_dir),
        ))
    }

    /// Startup hook: warm the model caches eagerly.
    pub fn preload(&self) -> AppResult<()> {
        self.cache.preload(&self.preload_models)
    }

    /// Transcribe an uploaded audio payload and format the result.
    ///
    /// The payload is spooled to a temp file for the duration of the call
    /// and removed on every exit path.
    pub fn transcribe_upload(
        &self,
        bytes: &[u8],
        filename: Option<&str>,
        request: &TranscribeRequest,
    ) -> AppResult<TranscriptionResponse> {
        let upload = ScopedUpload::materialize(bytes, &self.spool_dir, filename)?;
        let transcript = self.engine.transcribe(
            upload.path(),
            request.model,
            request.language,
            request.align_mode,
            request.audio_preprocessing,
        )?;
        Ok(format_transcript(transcript, request.format))
    }

    /// What is currently cached, for the health endpoint.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Shutdown hook: release cached models and accelerator memory.
    pub fn shutdown(&self) {
        info!("Cleaning up transcription resources...");
        self.cache.evict_all();
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::loader;
    use crate::audio::SeparatedTracks;
    use crate::error::AppError;
    use crate::transcription::cache::tests::CountingLoader;
    use candle_core::Device;
    use std::path::Path;

    struct UnusedSeparator;

    impl crate::audio::VocalSeparator for UnusedSeparator {
        fn separate(&self, _input: &Path) -> AppResult<SeparatedTracks> {
            panic!("separator must not run when preprocessing is off");
        }
    }

    fn test_service(spool_dir: &Path) -> TranscriptionService {
        let cache = Arc::new(ModelCache::new(
            Box::new(CountingLoader::new()),
            Device::Cpu,
        ));
        let engine = TranscriptionEngine::new(
            Arc::clone(&cache),
            Arc::new(UnusedSeparator),
            DecodeParams {
                batch_size: 4,
                chunk_size: 10,
            },
        );
        TranscriptionService::new(
            engine,
            cache,
            vec![ModelId::Small],
            spool_dir.to_path_buf(),
        )
    }

    fn wav_bytes() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fixture.wav");
        loader::write_waveform(&path, &vec![0.01f32; 16_000], loader::SAMPLE_RATE).unwrap();
        std::fs::read(&path).unwrap()
    }

    #[test]
    fn test_transcribe_upload_text_format() {
        let spool = tempfile::tempdir().unwrap();
        let service = test_service(spool.path());

        let request = TranscribeRequest {
            format: ResultFormat::Text,
            align_mode: false,
            audio_preprocessing: false,
            ..TranscribeRequest::default()
        };
        let response = service
            .transcribe_upload(&wav_bytes(), Some("take.wav"), &request)
            .unwrap();

        match response {
            TranscriptionResponse::Text { text } => assert_eq!(text, "stub"),
            _ => panic!("expected text payload"),
        }
        // the spooled upload was removed
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_upload_removed_on_engine_failure() {
        let spool = tempfile::tempdir().unwrap();
        let service = test_service(spool.path());

        let request = TranscribeRequest {
            align_mode: false,
            audio_preprocessing: false,
            ..TranscribeRequest::default()
        };
        let err = service
            .transcribe_upload(b"not a wav file", Some("broken.wav"), &request)
            .unwrap_err();

        assert!(matches!(err, AppError::InvalidAudio(_)));
        assert_eq!(std::fs::read_dir(spool.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_preload_and_shutdown_round_trip() {
        let spool = tempfile::tempdir().unwrap();
        let service = test_service(spool.path());

        service.preload().unwrap();
        assert!(!service.cache_stats().asr_models.is_empty());

        service.shutdown();
        assert!(service.cache_stats().asr_models.is_empty());
        assert!(service.cache_stats().align_languages.is_empty());
    }
}
