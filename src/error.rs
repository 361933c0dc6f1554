//! # Error Handling
//!
//! Defines the service error taxonomy and how each class is converted to an
//! HTTP response.
//!
//! ## Error Categories:
//! - **ModelLoad**: a model could not be deserialized (503, service-unavailable class)
//! - **InvalidAudio**: unreadable or corrupt uploaded audio (400)
//! - **ResourceExhausted**: the compute device ran out of memory mid-inference (503,
//!   raised only after the model caches have been evicted)
//! - **UnsupportedFormat**: unknown result format requested (400)
//! - **BadRequest**: malformed request fields (unknown model/language, missing file)
//! - **Separation**: the vocal separation step failed (500)
//! - **Inference**: a decode/alignment failure that is not resource exhaustion (500)
//! - **Internal**: everything else (500)
//!
//! ## JSON Response Format:
//! All errors return the same envelope so clients can branch on `type`:
//! ```json
//! {"error": {"type": "resource_exhausted", "message": "...", "timestamp": "..."}}
//! ```

use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use std::fmt;

/// Custom error types for the transcription service.
#[derive(Debug)]
pub enum AppError {
    /// An ASR or alignment model failed to load from the download root.
    ModelLoad(String),

    /// The uploaded audio could not be read or decoded.
    InvalidAudio(String),

    /// The compute device ran out of memory (or equivalent capacity) during
    /// inference. The model caches have already been evicted when this is raised.
    ResourceExhausted(String),

    /// The requested result format is not one of the supported values.
    UnsupportedFormat(String),

    /// Client sent invalid or malformed request data.
    BadRequest(String),

    /// Vocal source separation failed.
    Separation(String),

    /// Decode or alignment failed for a reason other than resource exhaustion.
    Inference(String),

    /// Internal server errors.
    Internal(String),
}

impl AppError {
    /// Classify an inference-time failure.
    ///
    /// Accelerator out-of-memory conditions surface as runtime errors whose
    /// message names the allocation failure; those become
    /// [`AppError::ResourceExhausted`] so the engine knows to evict the model
    /// caches before propagating. Everything else is a plain inference error.
    pub fn inference(err: impl fmt::Display) -> Self {
        let message = err.to_string();
        let lowered = message.to_lowercase();
        if lowered.contains("out of memory")
            || lowered.contains("cuda_error_out_of_memory")
            || lowered.contains("allocation failed")
            || lowered.contains("oom")
        {
            AppError::ResourceExhausted(message)
        } else {
            AppError::Inference(message)
        }
    }

    /// Whether this error is the resource-exhaustion class that triggers
    /// cache eviction as a recovery side effect.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(self, AppError::ResourceExhausted(_))
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::ModelLoad(msg) => write!(f, "Model load failed: {}", msg),
            AppError::InvalidAudio(msg) => write!(f, "Invalid audio: {}", msg),
            AppError::ResourceExhausted(msg) => write!(f, "Resource exhausted: {}", msg),
            AppError::UnsupportedFormat(msg) => write!(f, "Unsupported result format: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::Separation(msg) => write!(f, "Audio separation failed: {}", msg),
            AppError::Inference(msg) => write!(f, "Inference failed: {}", msg),
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

/// Maps each error class to an HTTP status and a machine-readable type tag.
impl ResponseError for AppError {
    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = match self {
            AppError::ModelLoad(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "model_load_failed",
                msg.clone(),
            ),
            AppError::InvalidAudio(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "invalid_audio",
                msg.clone(),
            ),
            AppError::ResourceExhausted(msg) => (
                actix_web::http::StatusCode::SERVICE_UNAVAILABLE,
                "resource_exhausted",
                msg.clone(),
            ),
            AppError::UnsupportedFormat(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "unsupported_format",
                msg.clone(),
            ),
            AppError::BadRequest(msg) => (
                actix_web::http::StatusCode::BAD_REQUEST,
                "bad_request",
                msg.clone(),
            ),
            AppError::Separation(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "separation_failed",
                msg.clone(),
            ),
            AppError::Inference(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "inference_failed",
                msg.clone(),
            ),
            AppError::Internal(msg) => (
                actix_web::http::StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                msg.clone(),
            ),
        };

        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

/// Type alias for Results that use our custom error type.
pub type AppResult<T> = Result<T, AppError>;
