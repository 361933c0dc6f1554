//! # Forced Alignment Pipeline
//!
//! Refines segment timestamps down to the word level by force-aligning the
//! decoded text against the waveform with a per-language CTC acoustic model
//! (wav2vec2 ONNX export) run through onnxruntime.
//!
//! ## Alignment Process (per segment):
//! 1. Slice the waveform to the segment's time bounds
//! 2. Run the acoustic model: samples → frame-level log-probabilities over
//!    the model's character vocabulary
//! 3. Viterbi-align the segment's characters onto the frame grid
//! 4. Group character frames into words; derive word times and scores
//!
//! Characters outside the model vocabulary cannot be placed on the grid;
//! words consisting only of such characters keep `None` timing.

use std::collections::HashMap;
use std::path::Path;

use ndarray::Array2;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Value;

use crate::error::{AppError, AppResult};
use crate::transcription::pipeline::ForcedAligner;
use crate::transcription::types::{AlignedTranscript, Language, RawSegment, WordSegment};

const SAMPLE_RATE: usize = 16_000;

/// Vocabulary metadata shipped alongside the acoustic model.
///
/// Wav2vec2 CTC checkpoints use the padding token as the CTC blank and `|`
/// as the word delimiter.
#[derive(Debug, Clone)]
pub struct AlignMetadata {
    char_to_id: HashMap<char, usize>,
    blank_id: usize,
    delimiter_id: Option<usize>,
    vocab_size: usize,
}

impl AlignMetadata {
    /// Build metadata from a parsed `vocab.json` token → id map.
    pub fn from_vocab(vocab: &HashMap<String, usize>) -> AppResult<Self> {
        let blank_id = vocab
            .get("<pad>")
            .or_else(|| vocab.get("[PAD]"))
            .copied()
            .ok_or_else(|| AppError::ModelLoad("alignment vocab has no blank token".into()))?;
        let delimiter_id = vocab.get("|").copied();

        // single-character tokens form the alignable alphabet; keyed
        // lowercase since targets are lowercased and some checkpoints ship
        // uppercase vocabularies
        let mut char_to_id = HashMap::new();
        for (token, &id) in vocab {
            let mut chars = token.chars();
            if let (Some(ch), None) = (chars.next(), chars.next()) {
                if ch != '|' {
                    for lowered in ch.to_lowercase() {
                        char_to_id.entry(lowered).or_insert(id);
                    }
                }
            }
        }

        let vocab_size = vocab.values().copied().max().map(|m| m + 1).unwrap_or(0);
        Ok(Self {
            char_to_id,
            blank_id,
            delimiter_id,
            vocab_size,
        })
    }
}

/// A loaded alignment pipeline: the acoustic model session plus its
/// vocabulary metadata, bound to one language.
pub struct CtcAligner {
    session: Session,
    metadata: AlignMetadata,
    language: Language,
}

impl CtcAligner {
    /// Load the alignment model for `language` from the HuggingFace hub,
    /// caching artifacts under `download_root`.
    pub fn load(language: Language, download_root: &str) -> AppResult<Self> {
        let load_err = |e: &dyn std::fmt::Display| {
            AppError::ModelLoad(format!("{}: {}", language.align_repo(), e))
        };

        let api = hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(download_root.into())
            .with_progress(false)
            .build()
            .map_err(|e| load_err(&e))?;
        let repo = api.model(language.align_repo().to_string());

        let vocab_path = repo.get("vocab.json").map_err(|e| load_err(&e))?;
        let model_path = repo.get("model.onnx").map_err(|e| load_err(&e))?;

        let vocab: HashMap<String, usize> = serde_json::from_reader(
            std::fs::File::open(vocab_path).map_err(|e| load_err(&e))?,
        )
        .map_err(|e| load_err(&e))?;
        let metadata = AlignMetadata::from_vocab(&vocab)?;

        let session = create_session(&model_path).map_err(|e| load_err(&e))?;

        tracing::debug!(language = %language, "Align model loaded");
        Ok(Self {
            session,
            metadata,
            language,
        })
    }

    /// Frame-level log-probabilities for one segment's samples.
    /// Returns `(n_frames, flat row-major [n_frames, vocab])`.
    fn frame_log_probs(&mut self, samples: &[f32]) -> AppResult<(usize, Vec<f32>)> {
        let input = Array2::from_shape_vec((1, samples.len()), samples.to_vec())
            .map_err(AppError::inference)?;
        let input = Value::from_array(input).map_err(AppError::inference)?;
        let outputs = self
            .session
            .run(ort::inputs!["input_values" => input])
            .map_err(AppError::inference)?;
        let (shape, data) = outputs["logits"]
            .try_extract_tensor::<f32>()
            .map_err(AppError::inference)?;

        if shape.len() != 3 {
            return Err(AppError::Inference(format!(
                "unexpected logits rank {} from align model",
                shape.len()
            )));
        }
        let n_frames = shape[1] as usize;
        let vocab = shape[2] as usize;
        if vocab != self.metadata.vocab_size && self.metadata.vocab_size != 0 {
            tracing::debug!(
                expected = self.metadata.vocab_size,
                got = vocab,
                "align model vocab differs from vocab.json; using model width"
            );
        }

        let mut log_probs = Vec::with_capacity(n_frames * vocab);
        for frame in data.chunks(vocab).take(n_frames) {
            let max = frame.iter().copied().fold(f32::NEG_INFINITY, f32::max);
            let log_sum = frame.iter().map(|&v| (v - max).exp()).sum::<f32>().ln() + max;
            log_probs.extend(frame.iter().map(|&v| v - log_sum));
        }
        Ok((n_frames, log_probs))
    }

    /// Align one segment, producing its aligned words and (when any word
    /// got timing) refined segment bounds.
    fn align_segment(
        &mut self,
        segment: &RawSegment,
        audio: &[f32],
    ) -> AppResult<(RawSegment, Vec<WordSegment>)> {
        let trimmed = segment.text.trim().to_string();
        let start_sample = ((segment.start * SAMPLE_RATE as f64) as usize).min(audio.len());
        let end_sample = ((segment.end * SAMPLE_RATE as f64) as usize)
            .clamp(start_sample, audio.len());
        let samples = &audio[start_sample..end_sample];

        let target = TargetTranscript::build(&trimmed, &self.metadata);
        if samples.is_empty() || target.tokens.is_empty() {
            // nothing alignable; keep the segment as decoded
            let words = target
                .words
                .iter()
                .map(|w| WordSegment {
                    word: w.text.clone(),
                    start: None,
                    end: None,
                    score: None,
                })
                .collect();
            return Ok((
                RawSegment {
                    start: segment.start,
                    end: segment.end,
                    text: trimmed,
                },
                words,
            ));
        }

        let (n_frames, log_probs) = self.frame_log_probs(samples)?;
        let vocab = log_probs.len() / n_frames.max(1);
        let char_frames = viterbi_align(
            &log_probs,
            n_frames,
            vocab,
            &target.tokens,
            self.metadata.blank_id,
        )
        .ok_or_else(|| {
            AppError::Inference(format!(
                "segment of {:.2}s has fewer frames than target characters",
                segment.end - segment.start
            ))
        })?;

        let sec_per_frame = (end_sample - start_sample) as f64 / SAMPLE_RATE as f64 / n_frames as f64;
        let to_time = |frame: usize| segment.start + frame as f64 * sec_per_frame;

        let mut words = Vec::with_capacity(target.words.len());
        for word in &target.words {
            let placed: Vec<&CharFrame> = word
                .token_positions
                .iter()
                .map(|&pos| &char_frames[pos])
                .collect();
            if placed.is_empty() {
                words.push(WordSegment {
                    word: word.text.clone(),
                    start: None,
                    end: None,
                    score: None,
                });
                continue;
            }
            let first = placed.first().map(|c| c.frame).unwrap_or(0);
            let last = placed.last().map(|c| c.frame).unwrap_or(first);
            let score = placed.iter().map(|c| c.prob as f64).sum::<f64>() / placed.len() as f64;
            words.push(WordSegment {
                word: word.text.clone(),
                start: Some(to_time(first)),
                end: Some(to_time(last + 1)),
                score: Some(score),
            });
        }

        let refined_start = words.iter().find_map(|w| w.start).unwrap_or(segment.start);
        let refined_end = words
            .iter()
            .rev()
            .find_map(|w| w.end)
            .unwrap_or(segment.end);

        Ok((
            RawSegment {
                start: refined_start,
                end: refined_end,
                text: trimmed,
            },
            words,
        ))
    }
}

impl ForcedAligner for CtcAligner {
    fn align(&mut self, segments: &[RawSegment], audio: &[f32]) -> AppResult<AlignedTranscript> {
        let mut out_segments = Vec::with_capacity(segments.len());
        let mut out_words = Vec::new();

        for segment in segments {
            let (normalized, words) = self.align_segment(segment, audio).map_err(|e| {
                tracing::debug!(language = %self.language, error = %e, "Segment alignment failed");
                e
            })?;
            out_segments.push(normalized);
            out_words.extend(words);
        }

        Ok(AlignedTranscript {
            segments: out_segments,
            words: out_words,
        })
    }
}

/// Build an onnxruntime session the way the rest of the service does:
/// full graph optimization, bounded intra-op threads.
pub(crate) fn create_session(model_path: &Path) -> ort::Result<Session> {
    let intra_threads = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .clamp(1, 8);
    Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Level3)?
        .with_intra_threads(intra_threads)?
        .commit_from_file(model_path)
}

/// One target word and where its characters landed in the token sequence.
struct TargetWord {
    text: String,
    token_positions: Vec<usize>,
}

/// The segment text lowered onto the alignment vocabulary: a flat CTC token
/// sequence (characters plus word delimiters) and the per-word positions.
struct TargetTranscript {
    tokens: Vec<usize>,
    words: Vec<TargetWord>,
}

impl TargetTranscript {
    fn build(text: &str, metadata: &AlignMetadata) -> Self {
        let mut tokens = Vec::new();
        let mut words = Vec::new();

        for (word_idx, raw_word) in text.split_whitespace().enumerate() {
            if word_idx > 0 {
                if let Some(delim) = metadata.delimiter_id {
                    tokens.push(delim);
                }
            }
            let mut positions = Vec::new();
            for ch in raw_word.to_lowercase().chars() {
                if let Some(&id) = metadata.char_to_id.get(&ch) {
                    positions.push(tokens.len());
                    tokens.push(id);
                }
            }
            words.push(TargetWord {
                text: raw_word.to_string(),
                token_positions: positions,
            });
        }

        Self { tokens, words }
    }
}

/// Frame placement of one target token after Viterbi alignment.
#[derive(Debug, Clone, Copy)]
struct CharFrame {
    frame: usize,
    prob: f32,
}

/// Force-align `tokens` onto the frame grid.
///
/// Standard CTC trellis over (frame, token-prefix-length): at each frame the
/// path either stays on the current prefix (emitting blank) or advances by
/// one token. Returns the emission frame and probability for every token, or
/// `None` when there are fewer frames than tokens.
fn viterbi_align(
    log_probs: &[f32],
    n_frames: usize,
    vocab: usize,
    tokens: &[usize],
    blank_id: usize,
) -> Option<Vec<CharFrame>> {
    let n_tokens = tokens.len();
    if n_frames < n_tokens || n_tokens == 0 {
        return None;
    }

    let lp = |frame: usize, token: usize| -> f32 {
        log_probs
            .get(frame * vocab + token)
            .copied()
            .unwrap_or(f32::NEG_INFINITY)
    };

    let width = n_tokens + 1;
    let mut trellis = vec![f32::NEG_INFINITY; (n_frames + 1) * width];
    trellis[0] = 0.0;

    for frame in 0..n_frames {
        for prefix in 0..width {
            let here = trellis[frame * width + prefix];
            if here == f32::NEG_INFINITY {
                continue;
            }
            // stay: emit blank
            let stay = here + lp(frame, blank_id);
            let cell = &mut trellis[(frame + 1) * width + prefix];
            if stay > *cell {
                *cell = stay;
            }
            // advance: emit the next token
            if prefix < n_tokens {
                let advance = here + lp(frame, tokens[prefix]);
                let cell = &mut trellis[(frame + 1) * width + prefix + 1];
                if advance > *cell {
                    *cell = advance;
                }
            }
        }
    }

    // backtrack from the full-prefix corner
    let mut placements = vec![CharFrame { frame: 0, prob: 0.0 }; n_tokens];
    let mut prefix = n_tokens;
    for frame in (0..n_frames).rev() {
        if prefix == 0 {
            break;
        }
        let current = trellis[(frame + 1) * width + prefix];
        let advanced = trellis[frame * width + prefix - 1] + lp(frame, tokens[prefix - 1]);
        if (advanced - current).abs() < 1e-5 {
            placements[prefix - 1] = CharFrame {
                frame,
                prob: lp(frame, tokens[prefix - 1]).exp(),
            };
            prefix -= 1;
        }
    }
    if prefix != 0 {
        return None;
    }
    Some(placements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_metadata() -> AlignMetadata {
        let mut vocab = HashMap::new();
        vocab.insert("<pad>".to_string(), 0);
        vocab.insert("|".to_string(), 1);
        vocab.insert("h".to_string(), 2);
        vocab.insert("i".to_string(), 3);
        AlignMetadata::from_vocab(&vocab).unwrap()
    }

    #[test]
    fn test_target_transcript_build() {
        let metadata = test_metadata();
        let target = TargetTranscript::build("Hi hi", &metadata);
        // h i | h i
        assert_eq!(target.tokens, vec![2, 3, 1, 2, 3]);
        assert_eq!(target.words.len(), 2);
        assert_eq!(target.words[0].text, "Hi");
        assert_eq!(target.words[0].token_positions, vec![0, 1]);
        assert_eq!(target.words[1].token_positions, vec![3, 4]);
    }

    #[test]
    fn test_target_transcript_skips_unknown_chars() {
        let metadata = test_metadata();
        let target = TargetTranscript::build("hi 42", &metadata);
        assert_eq!(target.words.len(), 2);
        assert!(target.words[1].token_positions.is_empty());
    }

    #[test]
    fn test_viterbi_places_tokens_in_order() {
        // 4 frames, vocab {blank=0, a=1, b=2}; frames strongly favor
        // a, blank, b, blank in order.
        let neg = -10.0f32;
        #[rustfmt::skip]
        let log_probs = vec![
            neg, -0.1, neg,  // frame 0: a
            -0.1, neg, neg,  // frame 1: blank
            neg, neg, -0.1,  // frame 2: b
            -0.1, neg, neg,  // frame 3: blank
        ];
        let placements = viterbi_align(&log_probs, 4, 3, &[1, 2], 0).unwrap();
        assert_eq!(placements[0].frame, 0);
        assert_eq!(placements[1].frame, 2);
        assert!(placements[0].prob > 0.8);
    }

    #[test]
    fn test_viterbi_rejects_too_few_frames() {
        let log_probs = vec![-0.1f32; 3];
        assert!(viterbi_align(&log_probs, 1, 3, &[1, 2], 0).is_none());
    }
}
