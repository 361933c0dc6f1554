//! # Health Check Endpoint
//!
//! Reports service liveness, uptime, and which models are currently cached.

use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;

pub async fn health_check(state: web::Data<AppState>) -> HttpResponse {
    let cache = state.service.cache_stats();
    let uptime_seconds = state.get_uptime_seconds();

    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "speech-transcription-backend",
            "version": env!("CARGO_PKG_VERSION"),
            "host": state.config.server.host,
            "port": state.config.server.port
        },
        "models": {
            "asr_cached": cache.asr_models,
            "align_cached": cache.align_languages,
            "device": state.config.transcription.device,
            "compute_type": state.config.transcription.compute_type
        }
    }))
}
