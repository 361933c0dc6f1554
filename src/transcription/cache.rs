//! # Model Cache
//!
//! Two independent memoization caches for heavyweight pipelines: ASR
//! pipelines keyed by model identity and alignment pipelines keyed by
//! language. Entries are created eagerly at startup (`preload`) or lazily on
//! first use, and live until `evict_all` drops everything and releases the
//! accelerator memory pool.
//!
//! ## Not a general-purpose cache:
//! No TTL, no size-based eviction, no LRU. The key space is the bounded,
//! known set of model and language identities, so the maps can only ever
//! hold a handful of entries.
//!
//! ## Locking:
//! Each map sits behind one coarse mutex that is held across a load. Loads
//! and evictions are rare next to inference calls, and holding the lock
//! while loading guarantees a key is never loaded twice concurrently and
//! that an eviction cannot interleave with an in-flight map read.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use candle_core::Device;
use serde::Serialize;
use tracing::{debug, info};

use crate::device::DeviceManager;
use crate::error::AppResult;
use crate::transcription::pipeline::{ForcedAligner, ModelLoader, SpeechRecognizer};
use crate::transcription::types::{Language, ModelId};

/// Shared handle to a cached ASR pipeline. The inner mutex serializes decode
/// calls, which mutate the decoder's key/value cache.
pub type AsrHandle = Arc<Mutex<Box<dyn SpeechRecognizer>>>;

/// Shared handle to a cached alignment pipeline.
pub type AlignHandle = Arc<Mutex<Box<dyn ForcedAligner>>>;

/// Snapshot of what is currently cached, for the health endpoint.
#[derive(Debug, Serialize)]
pub struct CacheStats {
    pub asr_models: Vec<String>,
    pub align_languages: Vec<String>,
}

/// Process-wide cache of loaded pipelines.
///
/// Explicitly constructed and passed into the engine, so tests can inject a
/// counting loader and multiple independent instances can coexist.
pub struct ModelCache {
    loader: Box<dyn ModelLoader>,
    device: Device,
    asr: Mutex<HashMap<ModelId, AsrHandle>>,
    align: Mutex<HashMap<Language, AlignHandle>>,
}

impl ModelCache {
    pub fn new(loader: Box<dyn ModelLoader>, device: Device) -> Self {
        Self {
            loader,
            device,
            asr: Mutex::new(HashMap::new()),
            align: Mutex::new(HashMap::new()),
        }
    }

    /// Get the cached ASR pipeline for `model`, loading it on first use.
    ///
    /// A load failure is surfaced to the caller and nothing is inserted;
    /// there are no retries.
    pub fn get_or_load_asr(&self, model: ModelId) -> AppResult<AsrHandle> {
        let mut asr = self.asr.lock().unwrap();
        if let Some(handle) = asr.get(&model) {
            return Ok(Arc::clone(handle));
        }
        let pipeline = self.loader.load_recognizer(model)?;
        let handle: AsrHandle = Arc::new(Mutex::new(pipeline));
        asr.insert(model, Arc::clone(&handle));
        Ok(handle)
    }

    /// Get the cached alignment pipeline for `language`, loading it on
    /// first use.
    pub fn get_or_load_align(&self, language: Language) -> AppResult<AlignHandle> {
        let mut align = self.align.lock().unwrap();
        if let Some(handle) = align.get(&language) {
            return Ok(Arc::clone(handle));
        }
        let aligner = self.loader.load_aligner(language)?;
        let handle: AlignHandle = Arc::new(Mutex::new(aligner));
        align.insert(language, Arc::clone(&handle));
        Ok(handle)
    }

    /// Warm the caches at startup: alignment models for every supported
    /// language, then the configured ASR models. A failure aborts startup.
    pub fn preload(&self, models: &[ModelId]) -> AppResult<()> {
        for &language in Language::all() {
            self.get_or_load_align(language)?;
        }
        for &model in models {
            self.get_or_load_asr(model)?;
        }
        info!(
            asr = models.len(),
            align = Language::all().len(),
            "Model preload complete"
        );
        Ok(())
    }

    /// Drop every cached entry from both maps and release the accelerator
    /// memory pool.
    ///
    /// An entry still referenced by an in-flight request keeps its memory
    /// until that request completes; everything else is freed here. This is
    /// the only way cached memory is reclaimed short of process exit.
    pub fn evict_all(&self) {
        debug!("Evicting model caches...");
        self.asr.lock().unwrap().clear();
        self.align.lock().unwrap().clear();
        DeviceManager::release_memory(&self.device);
        debug!("Model caches cleared");
    }

    /// What is currently cached.
    pub fn stats(&self) -> CacheStats {
        let asr_models = self
            .asr
            .lock()
            .unwrap()
            .keys()
            .map(|m| m.to_string())
            .collect();
        let align_languages = self
            .align
            .lock()
            .unwrap()
            .keys()
            .map(|l| l.to_string())
            .collect();
        CacheStats {
            asr_models,
            align_languages,
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::transcription::pipeline::DecodeParams;
    use crate::transcription::types::{AlignedTranscript, RawSegment, RawTranscript};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Recognizer double that returns a fixed transcript.
    pub(crate) struct StubRecognizer;

    impl SpeechRecognizer for StubRecognizer {
        fn transcribe(
            &mut self,
            _audio: &[f32],
            language: Option<Language>,
            _params: DecodeParams,
        ) -> AppResult<RawTranscript> {
            Ok(RawTranscript {
                segments: vec![RawSegment {
                    start: 0.0,
                    end: 1.0,
                    text: "stub".to_string(),
                }],
                language: language.unwrap_or(Language::En),
            })
        }
    }

    /// Aligner double that echoes the segments back untouched.
    pub(crate) struct StubAligner;

    impl ForcedAligner for StubAligner {
        fn align(
            &mut self,
            segments: &[RawSegment],
            _audio: &[f32],
        ) -> AppResult<AlignedTranscript> {
            Ok(AlignedTranscript {
                segments: segments.to_vec(),
                words: vec![],
            })
        }
    }

    /// Loader double that counts how many loads it performed.
    pub(crate) struct CountingLoader {
        pub asr_loads: AtomicUsize,
        pub align_loads: AtomicUsize,
        pub fail: bool,
    }

    impl CountingLoader {
        pub(crate) fn new() -> Self {
            Self {
                asr_loads: AtomicUsize::new(0),
                align_loads: AtomicUsize::new(0),
                fail: false,
            }
        }
    }

    impl ModelLoader for CountingLoader {
        fn load_recognizer(&self, model: ModelId) -> AppResult<Box<dyn SpeechRecognizer>> {
            if self.fail {
                return Err(AppError::ModelLoad(format!("no weights for {}", model)));
            }
            self.asr_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubRecognizer))
        }

        fn load_aligner(&self, language: Language) -> AppResult<Box<dyn ForcedAligner>> {
            if self.fail {
                return Err(AppError::ModelLoad(format!("no weights for {}", language)));
            }
            self.align_loads.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(StubAligner))
        }
    }

    fn cache_with_counting_loader() -> (ModelCache, &'static CountingLoader) {
        // leak the loader so the test can observe counts after handing
        // ownership to the cache
        let loader: &'static CountingLoader = Box::leak(Box::new(CountingLoader::new()));
        struct BorrowedLoader(&'static CountingLoader);
        impl ModelLoader for BorrowedLoader {
            fn load_recognizer(&self, model: ModelId) -> AppResult<Box<dyn SpeechRecognizer>> {
                self.0.load_recognizer(model)
            }
            fn load_aligner(&self, language: Language) -> AppResult<Box<dyn ForcedAligner>> {
                self.0.load_aligner(language)
            }
        }
        let cache = ModelCache::new(Box::new(BorrowedLoader(loader)), Device::Cpu);
        (cache, loader)
    }

    #[test]
    fn test_cache_idempotence() {
        let (cache, loader) = cache_with_counting_loader();

        let first = cache.get_or_load_asr(ModelId::Small).unwrap();
        let second = cache.get_or_load_asr(ModelId::Small).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.asr_loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_keys_load_separately() {
        let (cache, loader) = cache_with_counting_loader();

        let small = cache.get_or_load_asr(ModelId::Small).unwrap();
        let medium = cache.get_or_load_asr(ModelId::Medium).unwrap();

        assert!(!Arc::ptr_eq(&small, &medium));
        assert_eq!(loader.asr_loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_eviction_clears_state_and_forces_reload() {
        let (cache, loader) = cache_with_counting_loader();

        cache.get_or_load_asr(ModelId::Small).unwrap();
        cache.get_or_load_align(Language::En).unwrap();
        cache.evict_all();

        let stats = cache.stats();
        assert!(stats.asr_models.is_empty());
        assert!(stats.align_languages.is_empty());

        cache.get_or_load_asr(ModelId::Small).unwrap();
        assert_eq!(loader.asr_loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_load_failure_propagates_and_caches_nothing() {
        let loader = CountingLoader {
            asr_loads: AtomicUsize::new(0),
            align_loads: AtomicUsize::new(0),
            fail: true,
        };
        let cache = ModelCache::new(Box::new(loader), Device::Cpu);

        let err = cache.get_or_load_asr(ModelId::Small).err().unwrap();
        assert!(matches!(err, AppError::ModelLoad(_)));
        assert!(cache.stats().asr_models.is_empty());
    }

    #[test]
    fn test_preload_warms_all_languages() {
        let (cache, loader) = cache_with_counting_loader();

        cache.preload(&[ModelId::Small]).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.asr_models, vec!["small".to_string()]);
        assert_eq!(stats.align_languages.len(), Language::all().len());
        assert_eq!(
            loader.align_loads.load(Ordering::SeqCst),
            Language::all().len()
        );
    }
}
