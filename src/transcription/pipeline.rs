//! # Pipeline Abstractions
//!
//! The cache and engine depend on these traits instead of concrete model
//! implementations, which keeps orchestration code decoupled from inference
//! code and lets tests substitute doubles for the heavyweight pipelines.
//!
//! Production implementations: [`crate::transcription::whisper::WhisperPipeline`]
//! for recognition, [`crate::transcription::align::CtcAligner`] for forced
//! alignment, and [`crate::transcription::loader::HubModelLoader`] to
//! construct both.

use crate::error::AppResult;
use crate::transcription::types::{AlignedTranscript, Language, ModelId, RawSegment, RawTranscript};

/// Fixed numeric parameters of a decode call, sourced from configuration.
#[derive(Debug, Clone, Copy)]
pub struct DecodeParams {
    /// How many audio chunks are pushed through the encoder per forward pass.
    pub batch_size: usize,
    /// Decode window length in seconds.
    pub chunk_size: u32,
}

/// A loaded ASR pipeline bound to a device and numeric precision.
///
/// `transcribe` is blocking and CPU/accelerator-bound; callers are expected
/// to run it on a worker pool. Takes `&mut self` because decoding mutates the
/// decoder's key/value cache.
pub trait SpeechRecognizer: Send {
    /// Decode a 16 kHz mono waveform into raw timestamped segments.
    ///
    /// `language` is the caller's hint; when `None` the recognizer detects
    /// the language and reports it in the returned transcript.
    fn transcribe(
        &mut self,
        audio: &[f32],
        language: Option<Language>,
        params: DecodeParams,
    ) -> AppResult<RawTranscript>;
}

/// A loaded forced-alignment pipeline (acoustic model plus its metadata)
/// bound to one language.
pub trait ForcedAligner: Send {
    /// Align already-decoded segments against the waveform, refining segment
    /// boundaries and producing word-level timing.
    fn align(&mut self, segments: &[RawSegment], audio: &[f32]) -> AppResult<AlignedTranscript>;
}

/// Constructs pipelines from model artifacts on disk.
///
/// Injected into the cache so tests can count loads and return doubles.
/// Loading is synchronous and never retried: a failure here is surfaced to
/// the caller as a model-load error.
pub trait ModelLoader: Send + Sync {
    fn load_recognizer(&self, model: ModelId) -> AppResult<Box<dyn SpeechRecognizer>>;
    fn load_aligner(&self, language: Language) -> AppResult<Box<dyn ForcedAligner>>;
}
