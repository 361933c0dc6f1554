//! # Audio Handling
//!
//! Request-scoped audio plumbing: materializing uploads to disk, decoding
//! audio files into waveforms, and vocal source separation.
//!
//! ## Key Components:
//! - **Ingestion**: scoped temp-file lifetime for uploaded payloads
//! - **Loader**: WAV decode to 16 kHz mono f32 waveforms
//! - **Separator**: vocal/instrumental split via a pretrained ONNX model

pub mod ingest;
pub mod loader;
pub mod separator;

pub use ingest::ScopedUpload;
pub use separator::{SeparatedTracks, VocalSeparator};
