//! # Application State Management
//!
//! Shared state accessed by every HTTP request handler: the immutable
//! configuration snapshot, the process-wide transcription service, and the
//! server start time for uptime reporting.
//!
//! The service already synchronizes its own mutable internals (the model
//! caches), so the state itself only needs `Arc` for shared ownership.

use crate::config::AppConfig;
use crate::transcription::TranscriptionService;
use std::sync::Arc;
use std::time::Instant;

/// Shared application state cloned into every worker.
#[derive(Clone)]
pub struct AppState {
    /// Configuration loaded at startup.
    pub config: AppConfig,

    /// The process-wide transcription service (engine + model caches).
    pub service: Arc<TranscriptionService>,

    /// When the server started.
    pub start_time: Instant,
}

impl AppState {
    pub fn new(config: AppConfig, service: Arc<TranscriptionService>) -> Self {
        Self {
            config,
            service,
            start_time: Instant::now(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}
