//! # Whisper ASR Pipeline
//!
//! Loads a Whisper checkpoint with Candle and decodes 16 kHz mono audio into
//! timestamped segments.
//!
//! ## Decode Process:
//! 1. Compute the log-mel spectrogram for the whole waveform
//! 2. Split it into fixed-length chunk windows (configured chunk duration)
//! 3. Push up to `batch_size` windows through the encoder per forward pass
//! 4. Greedy-decode each window's audio features into text
//! 5. Emit one segment per window with the window's time bounds
//!
//! Language is taken from the caller's hint when present; otherwise it is
//! detected from the first window by comparing the decoder's start-of-
//! transcript logits across the supported language tokens.

use candle_core::{DType, Device, IndexOp, Tensor, D};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use tokenizers::Tokenizer;

use crate::error::{AppError, AppResult};
use crate::transcription::pipeline::{DecodeParams, SpeechRecognizer};
use crate::transcription::types::{Language, ModelId, RawSegment, RawTranscript};

/// A loaded Whisper model bound to a device and numeric precision.
pub struct WhisperPipeline {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    device: Device,
    dtype: DType,
    sot_token: u32,
    eot_token: u32,
    transcribe_token: u32,
    no_timestamps_token: u32,
}

impl WhisperPipeline {
    /// Load a Whisper checkpoint from the HuggingFace hub, caching artifacts
    /// under `download_root`.
    ///
    /// Loading is synchronous and never retried; any failure is surfaced to
    /// the caller as a model-load error.
    pub fn load(
        model_id: ModelId,
        device: Device,
        dtype: DType,
        download_root: &str,
    ) -> AppResult<Self> {
        let load_err = |e: &dyn std::fmt::Display| {
            AppError::ModelLoad(format!("{}: {}", model_id.repo_name(), e))
        };

        let api = hf_hub::api::sync::ApiBuilder::new()
            .with_cache_dir(download_root.into())
            .with_progress(false)
            .build()
            .map_err(|e| load_err(&e))?;
        let repo = api.model(model_id.repo_name().to_string());

        let config_path = repo.get("config.json").map_err(|e| load_err(&e))?;
        let tokenizer_path = repo.get("tokenizer.json").map_err(|e| load_err(&e))?;
        let weights_path = repo.get("model.safetensors").map_err(|e| load_err(&e))?;

        let config: Config = serde_json::from_reader(
            std::fs::File::open(config_path).map_err(|e| load_err(&e))?,
        )
        .map_err(|e| load_err(&e))?;
        let tokenizer = Tokenizer::from_file(tokenizer_path).map_err(|e| load_err(&e))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_path], dtype, &device)
                .map_err(|e| load_err(&e))?
        };
        let model = m::model::Whisper::load(&vb, config.clone()).map_err(|e| load_err(&e))?;

        let mel_filters = mel_filter_bank(config.num_mel_bins);

        let sot_token = token_id(&tokenizer, "<|startoftranscript|>")?;
        let eot_token = token_id(&tokenizer, "<|endoftext|>")?;
        let transcribe_token = token_id(&tokenizer, "<|transcribe|>")?;
        let no_timestamps_token = token_id(&tokenizer, "<|notimestamps|>")?;

        Ok(Self {
            model,
            config,
            tokenizer,
            mel_filters,
            device,
            dtype,
            sot_token,
            eot_token,
            transcribe_token,
            no_timestamps_token,
        })
    }

    /// Detect the spoken language from one window's audio features.
    ///
    /// The model scores every language token after `<|startoftranscript|>`;
    /// only the supported subset is compared, so the result always maps onto
    /// an alignment cache key.
    fn detect_language(&mut self, audio_features: &Tensor) -> AppResult<Language> {
        let tokens = Tensor::new(&[self.sot_token], &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(AppError::inference)?;
        let ys = self
            .model
            .decoder
            .forward(&tokens, audio_features, true)
            .map_err(AppError::inference)?;
        let logits = self
            .model
            .decoder
            .final_linear(&ys)
            .and_then(|l| l.i((0, 0)))
            .and_then(|l| l.to_dtype(DType::F32))
            .and_then(|l| l.to_vec1::<f32>())
            .map_err(AppError::inference)?;

        let mut best = Language::En;
        let mut best_logit = f32::NEG_INFINITY;
        for &language in Language::all() {
            let token = token_id(&self.tokenizer, &format!("<|{}|>", language.as_str()))?;
            let logit = logits
                .get(token as usize)
                .copied()
                .unwrap_or(f32::NEG_INFINITY);
            if logit > best_logit {
                best_logit = logit;
                best = language;
            }
        }
        tracing::debug!(language = %best, "Detected language");
        Ok(best)
    }

    /// Greedy-decode one window's audio features into text.
    fn decode_window(&mut self, audio_features: &Tensor, language: Language) -> AppResult<String> {
        let lang_token = token_id(&self.tokenizer, &format!("<|{}|>", language.as_str()))?;
        let mut tokens = vec![
            self.sot_token,
            lang_token,
            self.transcribe_token,
            self.no_timestamps_token,
        ];
        let prompt_len = tokens.len();
        let sample_len = self.config.max_target_positions / 2;

        for step in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(AppError::inference)?;
            let ys = self
                .model
                .decoder
                .forward(&tokens_t, audio_features, step == 0)
                .map_err(AppError::inference)?;
            let (_, seq_len, _) = ys.dims3().map_err(AppError::inference)?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..)).map_err(AppError::inference)?)
                .and_then(|l| l.i(0))
                .and_then(|l| l.i(0))
                .map_err(AppError::inference)?;
            let next_token = logits
                .argmax(D::Minus1)
                .and_then(|t| t.to_scalar::<u32>())
                .map_err(AppError::inference)?;
            if next_token == self.eot_token {
                break;
            }
            tokens.push(next_token);
        }

        self.tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(AppError::inference)
    }

    /// Compute the log-mel spectrogram for one chunk's samples, zero-padded
    /// to the full chunk length so every window in a batch has equal frames.
    fn chunk_mel(&self, samples: &[f32], chunk_samples: usize) -> AppResult<Tensor> {
        let mut padded = samples.to_vec();
        padded.resize(chunk_samples, 0.0);
        let mel = m::audio::pcm_to_mel(&self.config, &padded, &self.mel_filters);
        let n_frames = mel.len() / self.config.num_mel_bins;
        Tensor::from_vec(mel, (1, self.config.num_mel_bins, n_frames), &self.device)
            .and_then(|t| t.to_dtype(self.dtype))
            .map_err(AppError::inference)
    }
}

impl SpeechRecognizer for WhisperPipeline {
    fn transcribe(
        &mut self,
        audio: &[f32],
        language: Option<Language>,
        params: DecodeParams,
    ) -> AppResult<RawTranscript> {
        if audio.is_empty() {
            return Err(AppError::InvalidAudio("audio is empty".to_string()));
        }

        let chunk_samples = params.chunk_size as usize * m::SAMPLE_RATE;
        let spans = chunk_spans(audio.len(), chunk_samples);
        let total_secs = audio.len() as f64 / m::SAMPLE_RATE as f64;

        let mut segments = Vec::with_capacity(spans.len());
        let mut resolved_language = language;

        for batch in spans.chunks(params.batch_size.max(1)) {
            let mels = batch
                .iter()
                .map(|&(start, end)| self.chunk_mel(&audio[start..end], chunk_samples))
                .collect::<AppResult<Vec<_>>>()?;
            let mel_refs: Vec<&Tensor> = mels.iter().collect();
            let mel_batch = Tensor::cat(&mel_refs, 0).map_err(AppError::inference)?;

            let features = self
                .model
                .encoder
                .forward(&mel_batch, true)
                .map_err(AppError::inference)?;

            for (idx, &(start, _)) in batch.iter().enumerate() {
                let window_features = features.narrow(0, idx, 1).map_err(AppError::inference)?;

                let lang = match resolved_language {
                    Some(lang) => lang,
                    None => {
                        let detected = self.detect_language(&window_features)?;
                        resolved_language = Some(detected);
                        detected
                    }
                };

                let text = self.decode_window(&window_features, lang)?;
                if text.trim().is_empty() {
                    continue;
                }

                let seg_start = start as f64 / m::SAMPLE_RATE as f64;
                let seg_end = (seg_start + params.chunk_size as f64).min(total_secs);
                segments.push(RawSegment {
                    start: seg_start,
                    end: seg_end,
                    text,
                });
            }
        }

        Ok(RawTranscript {
            segments,
            language: resolved_language.unwrap_or(Language::En),
        })
    }
}

/// Sample spans `[start, end)` covering the waveform in chunk-sized windows.
fn chunk_spans(n_samples: usize, chunk_samples: usize) -> Vec<(usize, usize)> {
    let mut spans = Vec::new();
    let mut start = 0;
    while start < n_samples {
        let end = (start + chunk_samples).min(n_samples);
        spans.push((start, end));
        start = end;
    }
    spans
}

/// Look up a special token's id, failing as a model-load error since a
/// missing special token means the tokenizer artifact is unusable.
fn token_id(tokenizer: &Tokenizer, token: &str) -> AppResult<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| AppError::ModelLoad(format!("tokenizer has no id for {}", token)))
}

/// Mel filter bank matching Whisper's front end: triangular filters spaced
/// evenly on the mel scale over the 201 FFT bins, Slaney-normalized. Laid
/// out row-major as `n_mels` rows of `n_fft / 2 + 1` weights.
fn mel_filter_bank(n_mels: usize) -> Vec<f32> {
    let n_freqs = m::N_FFT / 2 + 1;
    let sample_rate = m::SAMPLE_RATE as f32;

    let hz_to_mel = |hz: f32| 2595.0 * (1.0 + hz / 700.0).log10();
    let mel_to_hz = |mel: f32| 700.0 * (10f32.powf(mel / 2595.0) - 1.0);

    let mel_max = hz_to_mel(sample_rate / 2.0);
    let hz_points: Vec<f32> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f32 / (n_mels + 1) as f32))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel_idx in 0..n_mels {
        let (left, center, right) = (
            hz_points[mel_idx],
            hz_points[mel_idx + 1],
            hz_points[mel_idx + 2],
        );
        let norm = 2.0 / (right - left);
        for freq_idx in 0..n_freqs {
            let freq = freq_idx as f32 * sample_rate / m::N_FFT as f32;
            let weight = if freq <= center {
                (freq - left) / (center - left)
            } else {
                (right - freq) / (right - center)
            };
            if weight > 0.0 {
                filters[mel_idx * n_freqs + freq_idx] = weight * norm;
            }
        }
    }
    filters
}
