//! # Transcription Engine
//!
//! Per-request orchestration: audio loading → optional vocal separation →
//! ASR decode → optional forced alignment, with the failure-recovery policy
//! for resource exhaustion.
//!
//! ## Recovery Policy:
//! A decode or alignment failure that indicates accelerator memory
//! exhaustion evicts both model caches (reclaiming device memory) before the
//! error propagates; the request fails but the process stays usable and
//! models reload lazily on the next request. Any other alignment failure
//! degrades the request to unaligned output instead of failing it.
//!
//! The engine is synchronous and blocking; HTTP handlers run it on a worker
//! pool.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::audio::{loader, VocalSeparator};
use crate::error::{AppError, AppResult};
use crate::transcription::cache::ModelCache;
use crate::transcription::pipeline::DecodeParams;
use crate::transcription::types::{AlignedTranscript, Language, ModelId, RawTranscript, Transcript};

/// Orchestrates the transcription pipeline over the shared model cache and
/// separator.
pub struct TranscriptionEngine {
    cache: Arc<ModelCache>,
    separator: Arc<dyn VocalSeparator>,
    params: DecodeParams,
}

impl TranscriptionEngine {
    pub fn new(
        cache: Arc<ModelCache>,
        separator: Arc<dyn VocalSeparator>,
        params: DecodeParams,
    ) -> Self {
        Self {
            cache,
            separator,
            params,
        }
    }

    /// Transcribe the audio file at `audio_path`.
    ///
    /// Returns word-level data only when `align_mode` was requested and the
    /// alignment pass succeeded; otherwise the plain segments.
    pub fn transcribe(
        &self,
        audio_path: &Path,
        model: ModelId,
        language: Option<Language>,
        align_mode: bool,
        preprocess: bool,
    ) -> AppResult<Transcript> {
        let waveform = if preprocess {
            let tracks = self.separator.separate(audio_path)?;
            let waveform = loader::load_waveform(&tracks.vocals)?;
            // both separated files are consumed at this point
            tracks.cleanup();
            waveform
        } else {
            loader::load_waveform(audio_path)?
        };

        let transcript = self.decode(&waveform, model, language, audio_path)?;

        if align_mode {
            match self.align(&transcript, &waveform) {
                Ok(aligned) => {
                    return Ok(Transcript::Aligned {
                        segments: aligned.segments,
                        words: aligned.words,
                    })
                }
                Err(e) if e.is_resource_exhaustion() => return Err(e),
                Err(e) => {
                    warn!(
                        language = %transcript.language,
                        error = %e,
                        "Alignment failed (fallback to raw segments)"
                    );
                }
            }
        }

        Ok(Transcript::Plain(transcript.segments))
    }

    /// Resolve the ASR pipeline and decode the waveform.
    fn decode(
        &self,
        waveform: &[f32],
        model: ModelId,
        language: Option<Language>,
        audio_path: &Path,
    ) -> AppResult<RawTranscript> {
        let asr = self.cache.get_or_load_asr(model)?;

        debug!(
            model = %model,
            language = language.map(|l| l.as_str()).unwrap_or("auto"),
            batch_size = self.params.batch_size,
            chunk_size = self.params.chunk_size,
            "Transcribing..."
        );
        let result = asr.lock().unwrap().transcribe(waveform, language, self.params);
        match result {
            Ok(transcript) => {
                debug!(segments = transcript.segments.len(), "Transcribed audio file");
                Ok(transcript)
            }
            Err(e) if e.is_resource_exhaustion() => {
                error!(
                    model = %model,
                    audio_file = %audio_path.display(),
                    error = %e,
                    "Transcription runtime error"
                );
                self.cache.evict_all();
                Err(e)
            }
            Err(e) => {
                error!(
                    model = %model,
                    audio_file = %audio_path.display(),
                    error = %e,
                    "Transcribing failed"
                );
                Err(e)
            }
        }
    }

    /// Resolve the aligner for the decoded language and run forced
    /// alignment. Resource exhaustion evicts the caches before propagating;
    /// every other failure (including an aligner that fails to load) is
    /// returned for the caller to degrade on.
    fn align(&self, transcript: &RawTranscript, waveform: &[f32]) -> AppResult<AlignedTranscript> {
        let aligner = self.cache.get_or_load_align(transcript.language)?;
        let result = aligner
            .lock()
            .unwrap()
            .align(&transcript.segments, waveform);
        match result {
            Err(e) if e.is_resource_exhaustion() => {
                error!(
                    language = %transcript.language,
                    error = %e,
                    "Alignment runtime error"
                );
                self.cache.evict_all();
                Err(e)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SeparatedTracks;
    use crate::transcription::pipeline::{ForcedAligner, ModelLoader, SpeechRecognizer};
    use crate::transcription::types::{RawSegment, WordSegment};
    use candle_core::Device;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn params() -> DecodeParams {
        DecodeParams {
            batch_size: 4,
            chunk_size: 10,
        }
    }

    fn raw_segments() -> Vec<RawSegment> {
        vec![
            RawSegment {
                start: 0.0,
                end: 1.0,
                text: " hi ".to_string(),
            },
            RawSegment {
                start: 1.0,
                end: 2.0,
                text: "there".to_string(),
            },
        ]
    }

    /// How a scripted pipeline stage should behave.
    #[derive(Clone, Copy, PartialEq)]
    enum Behavior {
        Succeed,
        FailResource,
        FailOther,
    }

    struct ScriptedRecognizer(Behavior);

    impl SpeechRecognizer for ScriptedRecognizer {
        fn transcribe(
            &mut self,
            _audio: &[f32],
            language: Option<Language>,
            _params: DecodeParams,
        ) -> AppResult<RawTranscript> {
            match self.0 {
                Behavior::Succeed => Ok(RawTranscript {
                    segments: raw_segments(),
                    language: language.unwrap_or(Language::En),
                }),
                Behavior::FailResource => {
                    Err(AppError::ResourceExhausted("device out of memory".into()))
                }
                Behavior::FailOther => Err(AppError::Inference("decode blew up".into())),
            }
        }
    }

    struct ScriptedAligner(Behavior);

    impl ForcedAligner for ScriptedAligner {
        fn align(
            &mut self,
            segments: &[RawSegment],
            _audio: &[f32],
        ) -> AppResult<AlignedTranscript> {
            match self.0 {
                Behavior::Succeed => Ok(AlignedTranscript {
                    segments: segments
                        .iter()
                        .map(|s| RawSegment {
                            start: s.start,
                            end: s.end,
                            text: s.text.trim().to_string(),
                        })
                        .collect(),
                    words: vec![WordSegment {
                        word: "hi".to_string(),
                        start: Some(0.1),
                        end: Some(0.4),
                        score: Some(0.9),
                    }],
                }),
                Behavior::FailResource => {
                    Err(AppError::ResourceExhausted("device out of memory".into()))
                }
                Behavior::FailOther => Err(AppError::Inference("trellis degenerate".into())),
            }
        }
    }

    struct ScriptedLoader {
        asr: Behavior,
        align: Behavior,
        align_languages: Mutex<Vec<Language>>,
    }

    impl ScriptedLoader {
        fn new(asr: Behavior, align: Behavior) -> Self {
            Self {
                asr,
                align,
                align_languages: Mutex::new(Vec::new()),
            }
        }
    }

    impl ModelLoader for ScriptedLoader {
        fn load_recognizer(&self, _model: ModelId) -> AppResult<Box<dyn SpeechRecognizer>> {
            Ok(Box::new(ScriptedRecognizer(self.asr)))
        }

        fn load_aligner(&self, language: Language) -> AppResult<Box<dyn ForcedAligner>> {
            self.align_languages.lock().unwrap().push(language);
            Ok(Box::new(ScriptedAligner(self.align)))
        }
    }

    /// Separator double that copies the input into two real temp files.
    struct FakeSeparator {
        dir: PathBuf,
    }

    impl VocalSeparator for FakeSeparator {
        fn separate(&self, input: &Path) -> AppResult<SeparatedTracks> {
            let tracks = SeparatedTracks {
                vocals: self.dir.join("vocals-test.wav"),
                instrumental: self.dir.join("instrumental-test.wav"),
            };
            std::fs::copy(input, &tracks.vocals).unwrap();
            std::fs::copy(input, &tracks.instrumental).unwrap();
            Ok(tracks)
        }
    }

    fn engine_with(
        asr: Behavior,
        align: Behavior,
        separator_dir: &Path,
    ) -> (TranscriptionEngine, Arc<ModelCache>) {
        let cache = Arc::new(ModelCache::new(
            Box::new(ScriptedLoader::new(asr, align)),
            Device::Cpu,
        ));
        let engine = TranscriptionEngine::new(
            Arc::clone(&cache),
            Arc::new(FakeSeparator {
                dir: separator_dir.to_path_buf(),
            }),
            params(),
        );
        (engine, cache)
    }

    fn write_test_audio(dir: &Path) -> PathBuf {
        let path = dir.join("input.wav");
        let samples = vec![0.01f32; 16_000];
        loader::write_waveform(&path, &samples, loader::SAMPLE_RATE).unwrap();
        path
    }

    #[test]
    fn test_plain_transcription() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let (engine, _) = engine_with(Behavior::Succeed, Behavior::Succeed, dir.path());

        let result = engine
            .transcribe(&audio, ModelId::Small, None, false, false)
            .unwrap();

        match result {
            Transcript::Plain(segments) => assert_eq!(segments, raw_segments()),
            Transcript::Aligned { .. } => panic!("alignment was not requested"),
        }
    }

    #[test]
    fn test_alignment_success_produces_words() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let (engine, _) = engine_with(Behavior::Succeed, Behavior::Succeed, dir.path());

        let result = engine
            .transcribe(&audio, ModelId::Small, Some(Language::En), true, false)
            .unwrap();

        match result {
            Transcript::Aligned { segments, words } => {
                assert_eq!(segments[0].text, "hi");
                assert_eq!(words.len(), 1);
            }
            Transcript::Plain(_) => panic!("expected aligned transcript"),
        }
    }

    #[test]
    fn test_alignment_fallback_on_non_resource_failure() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let (engine, cache) = engine_with(Behavior::Succeed, Behavior::FailOther, dir.path());

        let result = engine
            .transcribe(&audio, ModelId::Small, None, true, false)
            .unwrap();

        // original segments, unchanged, and no word list
        match result {
            Transcript::Plain(segments) => assert_eq!(segments, raw_segments()),
            Transcript::Aligned { .. } => panic!("failed alignment must not produce words"),
        }
        // the caches were not evicted
        assert!(!cache.stats().asr_models.is_empty());
    }

    #[test]
    fn test_decode_resource_exhaustion_evicts_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let (engine, cache) = engine_with(Behavior::FailResource, Behavior::Succeed, dir.path());
        cache.get_or_load_align(Language::En).unwrap();

        let err = engine
            .transcribe(&audio, ModelId::Small, None, false, false)
            .unwrap_err();

        assert!(err.is_resource_exhaustion());
        let stats = cache.stats();
        assert!(stats.asr_models.is_empty());
        assert!(stats.align_languages.is_empty());
    }

    #[test]
    fn test_align_resource_exhaustion_evicts_and_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let (engine, cache) = engine_with(Behavior::Succeed, Behavior::FailResource, dir.path());

        let err = engine
            .transcribe(&audio, ModelId::Small, None, true, false)
            .unwrap_err();

        assert!(err.is_resource_exhaustion());
        let stats = cache.stats();
        assert!(stats.asr_models.is_empty());
        assert!(stats.align_languages.is_empty());
    }

    #[test]
    fn test_aligner_resolved_for_decoded_language() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let loader_probe = Arc::new(ScriptedLoader::new(Behavior::Succeed, Behavior::Succeed));

        struct SharedLoader(Arc<ScriptedLoader>);
        impl ModelLoader for SharedLoader {
            fn load_recognizer(&self, model: ModelId) -> AppResult<Box<dyn SpeechRecognizer>> {
                self.0.load_recognizer(model)
            }
            fn load_aligner(&self, language: Language) -> AppResult<Box<dyn ForcedAligner>> {
                self.0.load_aligner(language)
            }
        }

        let cache = Arc::new(ModelCache::new(
            Box::new(SharedLoader(Arc::clone(&loader_probe))),
            Device::Cpu,
        ));
        let engine = TranscriptionEngine::new(
            cache,
            Arc::new(FakeSeparator {
                dir: dir.path().to_path_buf(),
            }),
            params(),
        );

        engine
            .transcribe(&audio, ModelId::Small, Some(Language::Ru), true, false)
            .unwrap();

        assert_eq!(
            *loader_probe.align_languages.lock().unwrap(),
            vec![Language::Ru]
        );
    }

    #[test]
    fn test_preprocessing_cleans_up_tracks_on_success() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let (engine, _) = engine_with(Behavior::Succeed, Behavior::Succeed, dir.path());

        engine
            .transcribe(&audio, ModelId::Small, None, false, true)
            .unwrap();

        assert!(!dir.path().join("vocals-test.wav").exists());
        assert!(!dir.path().join("instrumental-test.wav").exists());
    }

    #[test]
    fn test_preprocessing_cleans_up_tracks_on_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        let audio = write_test_audio(dir.path());
        let (engine, _) = engine_with(Behavior::FailResource, Behavior::Succeed, dir.path());

        engine
            .transcribe(&audio, ModelId::Small, None, false, true)
            .unwrap_err();

        assert!(!dir.path().join("vocals-test.wav").exists());
        assert!(!dir.path().join("instrumental-test.wav").exists());
    }
}
