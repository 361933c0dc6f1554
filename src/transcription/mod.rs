//! # Transcription Module
//!
//! Speech-to-text orchestration: the model-lifecycle cache, the per-request
//! pipeline (separate → load → decode → align → format), and its
//! failure/cleanup protocol.
//!
//! ## Key Components:
//! - **Model Cache**: memoized ASR and alignment pipelines with eager
//!   preload, lazy load-on-demand, and evict-all recovery
//! - **Transcription Engine**: per-request orchestration and the
//!   resource-exhaustion recovery policy
//! - **Pipelines**: Whisper decode via Candle, CTC forced alignment via
//!   onnxruntime
//! - **Result Formatting**: text / subtitle / full response shapes
//! - **Service Façade**: upload-handle adapter for the HTTP layer

pub mod align;
pub mod cache;
pub mod engine;
pub mod format;
pub mod loader;
pub mod pipeline;
pub mod service;
pub mod types;
pub mod whisper;

pub use cache::ModelCache;
pub use engine::TranscriptionEngine;
pub use service::{TranscribeRequest, TranscriptionService};
