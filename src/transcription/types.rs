//! # Transcription Domain Types
//!
//! Closed enumerations for model identity, alignment language, and result
//! format, plus the segment types flowing between the decode, alignment, and
//! formatting stages.
//!
//! All three enums are stable string keys: unknown values are rejected at the
//! parse boundary instead of falling through to a default.

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Supported ASR architectures.
///
/// The string form is the cache key; exactly one pipeline is ever held per
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelId {
    Small,
    Medium,
    Turbo,
}

impl ModelId {
    /// Stable string key used in the API and as the cache key.
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelId::Small => "small",
            ModelId::Medium => "medium",
            ModelId::Turbo => "turbo",
        }
    }

    /// HuggingFace repository holding this architecture's weights.
    pub fn repo_name(&self) -> &'static str {
        match self {
            ModelId::Small => "openai/whisper-small",
            ModelId::Medium => "openai/whisper-medium",
            ModelId::Turbo => "openai/whisper-large-v3-turbo",
        }
    }

    /// All supported model identities.
    pub fn all() -> &'static [ModelId] {
        &[ModelId::Small, ModelId::Medium, ModelId::Turbo]
    }
}

impl std::str::FromStr for ModelId {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "small" => Ok(ModelId::Small),
            "medium" => Ok(ModelId::Medium),
            "turbo" => Ok(ModelId::Turbo),
            _ => Err(AppError::BadRequest(format!("Unknown model: {}", s))),
        }
    }
}

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Languages with an alignment model available.
///
/// Also used as the alignment cache key. Alignment models for every variant
/// are preloaded eagerly at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    En,
    Ru,
}

impl Language {
    /// Two-letter language code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::En => "en",
            Language::Ru => "ru",
        }
    }

    /// HuggingFace repository holding the alignment acoustic model for this
    /// language (ONNX export of a CTC wav2vec2 checkpoint).
    pub fn align_repo(&self) -> &'static str {
        match self {
            Language::En => "jonatasgrosman/wav2vec2-large-xlsr-53-english",
            Language::Ru => "jonatasgrosman/wav2vec2-large-xlsr-53-russian",
        }
    }

    /// All supported alignment languages.
    pub fn all() -> &'static [Language] {
        &[Language::En, Language::Ru]
    }
}

impl std::str::FromStr for Language {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "en" => Ok(Language::En),
            "ru" => Ok(Language::Ru),
            _ => Err(AppError::BadRequest(format!("Unsupported language: {}", s))),
        }
    }
}

impl std::fmt::Display for Language {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Requested shape of the transcription response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultFormat {
    /// Plain text, all segments joined.
    Text,
    /// Numbered subtitle-style segments.
    Srt,
    /// Numbered segments plus word-level timestamps when available.
    Full,
}

impl std::str::FromStr for ResultFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(ResultFormat::Text),
            "srt" => Ok(ResultFormat::Srt),
            "full" => Ok(ResultFormat::Full),
            _ => Err(AppError::UnsupportedFormat(s.to_string())),
        }
    }
}

impl std::fmt::Display for ResultFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ResultFormat::Text => "text",
            ResultFormat::Srt => "srt",
            ResultFormat::Full => "full",
        };
        write!(f, "{}", name)
    }
}

/// A transcribed unit as produced by decode or alignment: start/end in
/// seconds plus the text. Immutable once produced; numbering happens at
/// formatting time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawSegment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// A word with refined timing, produced only by a successful alignment pass.
///
/// Timing is optional per word: characters outside the alignment vocabulary
/// (digits, foreign script) cannot be placed on the frame grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WordSegment {
    pub word: String,
    pub start: Option<f64>,
    pub end: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Raw decode output: segments plus the language the decoder settled on
/// (the caller's hint, or the detected language when no hint was given).
#[derive(Debug, Clone)]
pub struct RawTranscript {
    pub segments: Vec<RawSegment>,
    pub language: Language,
}

/// Output of a successful forced-alignment pass: normalized segments
/// (trimmed text, refined boundaries) plus per-word timing.
#[derive(Debug, Clone)]
pub struct AlignedTranscript {
    pub segments: Vec<RawSegment>,
    pub words: Vec<WordSegment>,
}

/// Final engine output. Word-level data exists only when alignment was
/// requested **and** succeeded; the two cases are distinct variants so the
/// formatting boundary has to handle both explicitly.
#[derive(Debug, Clone)]
pub enum Transcript {
    Plain(Vec<RawSegment>),
    Aligned {
        segments: Vec<RawSegment>,
        words: Vec<WordSegment>,
    },
}

impl Transcript {
    /// The segment list regardless of variant.
    pub fn segments(&self) -> &[RawSegment] {
        match self {
            Transcript::Plain(segments) => segments,
            Transcript::Aligned { segments, .. } => segments,
        }
    }
}
