//! # Result Formatting
//!
//! Pure, stateless conversion of raw transcripts into the three response
//! shapes: plain text, subtitle-style numbered segments, or full segments
//! plus word-level timestamps.
//!
//! Segment numbers are assigned here (1-based, original order), not by the
//! decoder. An unsupported format never reaches these functions: the closed
//! [`ResultFormat`] enum is rejected at the parse boundary.

use serde::Serialize;

use crate::transcription::types::{RawSegment, ResultFormat, Transcript, WordSegment};

/// Subtitle-style segment with its 1-based ordinal.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Segment {
    pub number: u32,
    pub text: String,
    pub start: f64,
    pub end: f64,
}

/// One of the three typed response payloads.
///
/// Serializes untagged, so clients see exactly `{text}`, `{segments}`, or
/// `{segments, words}`. `words` is `null` when alignment was skipped or
/// degraded — a failed alignment is never dressed up as word-level output.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TranscriptionResponse {
    Text {
        text: String,
    },
    Srt {
        segments: Vec<Segment>,
    },
    Full {
        segments: Vec<Segment>,
        words: Option<Vec<WordSegment>>,
    },
}

/// Dispatch a transcript into the requested response shape.
pub fn format_transcript(transcript: Transcript, format: ResultFormat) -> TranscriptionResponse {
    match format {
        ResultFormat::Text => TranscriptionResponse::Text {
            text: to_text(transcript.segments()),
        },
        ResultFormat::Srt => TranscriptionResponse::Srt {
            segments: to_numbered(transcript.segments()),
        },
        ResultFormat::Full => match transcript {
            Transcript::Plain(segments) => TranscriptionResponse::Full {
                segments: to_numbered(&segments),
                words: None,
            },
            Transcript::Aligned { segments, words } => TranscriptionResponse::Full {
                segments: to_numbered(&segments),
                words: Some(words),
            },
        },
    }
}

/// Join every segment's trimmed text with a single space, trimming the
/// result.
fn to_text(segments: &[RawSegment]) -> String {
    segments
        .iter()
        .map(|segment| segment.text.trim())
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

/// Number segments 1-based in their original order, trimming text.
fn to_numbered(segments: &[RawSegment]) -> Vec<Segment> {
    segments
        .iter()
        .enumerate()
        .map(|(index, segment)| Segment {
            number: index as u32 + 1,
            text: segment.text.trim().to_string(),
            start: segment.start,
            end: segment.end,
        })
        .collect()
}
