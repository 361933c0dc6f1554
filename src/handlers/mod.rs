//! # HTTP Request Handlers
//!
//! Thin request/response adapters over the transcription service.

pub mod transcription;

pub use transcription::{list_languages, list_models, transcribe};
