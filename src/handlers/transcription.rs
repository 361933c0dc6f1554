//! # Transcription Endpoints
//!
//! - `POST /transcribe`: multipart upload → transcription in the requested
//!   format
//! - `GET /models`, `GET /languages`: supported enumerations
//!
//! The handler only parses the multipart form; all heavy lifting happens in
//! the service on the blocking worker pool so inference never stalls the
//! event loop.

use actix_multipart::Multipart;
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use serde::Serialize;

use crate::error::AppError;
use crate::state::AppState;
use crate::transcription::types::{Language, ModelId};
use crate::transcription::TranscribeRequest;

/// Supported transcription models.
#[derive(Debug, Serialize)]
pub struct ModelList {
    pub models: Vec<&'static str>,
}

/// Supported transcription languages.
#[derive(Debug, Serialize)]
pub struct LanguageList {
    pub languages: Vec<&'static str>,
}

pub async fn list_models() -> HttpResponse {
    HttpResponse::Ok().json(ModelList {
        models: ModelId::all().iter().map(|m| m.as_str()).collect(),
    })
}

pub async fn list_languages() -> HttpResponse {
    HttpResponse::Ok().json(LanguageList {
        languages: Language::all().iter().map(|l| l.as_str()).collect(),
    })
}

/// Transcribe speech from an uploaded audio file.
///
/// Multipart fields: `file` (required), `model`, `language`,
/// `result_format`, `align_mode`, `audio_preprocessing`. Unknown values in
/// any option field are rejected before the upload is processed.
pub async fn transcribe(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut filename: Option<String> = None;
    let mut request = TranscribeRequest::default();

    while let Some(field) = payload.next().await {
        let mut field = field.map_err(|e| AppError::BadRequest(e.to_string()))?;
        let name = field.name().unwrap_or_default().to_string();

        match name.as_str() {
            "file" => {
                filename = field
                    .content_disposition()
                    .and_then(|cd| cd.get_filename())
                    .map(String::from);
                let mut bytes = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| AppError::BadRequest(e.to_string()))?;
                    bytes.extend_from_slice(&chunk);
                }
                file_bytes = Some(bytes);
            }
            "model" => request.model = read_text(&mut field).await?.parse::<ModelId>()?,
            "language" => {
                let value = read_text(&mut field).await?;
                if !value.is_empty() {
                    request.language = Some(value.parse::<Language>()?);
                }
            }
            "result_format" => request.format = read_text(&mut field).await?.parse()?,
            "align_mode" => request.align_mode = parse_bool(&read_text(&mut field).await?)?,
            "audio_preprocessing" => {
                request.audio_preprocessing = parse_bool(&read_text(&mut field).await?)?
            }
            // unknown fields are drained and ignored
            _ => while field.next().await.is_some() {},
        }
    }

    let bytes =
        file_bytes.ok_or_else(|| AppError::BadRequest("missing 'file' field".to_string()))?;
    if bytes.is_empty() {
        return Err(AppError::InvalidAudio("uploaded file is empty".to_string()));
    }

    let service = state.service.clone();
    let response = web::block(move || {
        service.transcribe_upload(&bytes, filename.as_deref(), &request)
    })
    .await
    .map_err(|e| AppError::Internal(format!("worker pool: {}", e)))??;

    Ok(HttpResponse::Ok().json(response))
}

/// Collect a small text field from the multipart stream.
async fn read_text(field: &mut actix_multipart::Field) -> Result<String, AppError> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(e.to_string()))?;
        bytes.extend_from_slice(&chunk);
    }
    String::from_utf8(bytes)
        .map(|s| s.trim().to_string())
        .map_err(|e| AppError::BadRequest(e.to_string()))
}

fn parse_bool(value: &str) -> Result<bool, AppError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(AppError::BadRequest(format!(
            "expected a boolean, got '{}'",
            value
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bool() {
        assert!(parse_bool("true").unwrap());
        assert!(parse_bool("1").unwrap());
        assert!(!parse_bool("False").unwrap());
        assert!(parse_bool("maybe").is_err());
    }
}
