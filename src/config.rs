//! # Configuration Management
//!
//! Loads application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_TRANSCRIPTION_DEVICE, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

use crate::transcription::types::ModelId;

/// Main application configuration that contains all settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transcription: TranscriptionSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Settings consumed by the transcription core.
///
/// ## Fields:
/// - `device`: where models run ("cpu", "cuda", "metal", "auto")
/// - `compute_type`: numeric precision for inference ("float32", "float16", "bfloat16")
/// - `download_root`: directory where model artifacts are fetched/cached
/// - `batch_size`: how many audio chunks are pushed through the encoder at once
/// - `chunk_size`: decode window length in seconds
/// - `preload_models`: ASR models warmed eagerly at startup (alignment models
///   for every supported language are always preloaded)
/// - `spool_dir`: directory for request-scoped temporary audio files
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionSettings {
    pub device: String,
    pub compute_type: String,
    pub download_root: String,
    pub batch_size: usize,
    pub chunk_size: u32,
    pub preload_models: Vec<String>,
    pub spool_dir: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            transcription: TranscriptionSettings {
                device: "cpu".to_string(),
                compute_type: "float32".to_string(),
                download_root: "models".to_string(),
                batch_size: 4,
                chunk_size: 10,
                preload_models: vec!["small".to_string()],
                spool_dir: env::temp_dir().to_string_lossy().to_string(),
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from defaults, `config.toml`, and `APP_`-prefixed
    /// environment variables, in that priority order.
    ///
    /// `HOST`/`PORT` are also honored without the prefix since deployment
    /// platforms commonly inject them bare.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Checks the port, the decode tuning parameters, and that every entry in
    /// the preload list names a known model, so a typo fails at startup rather
    /// than on the first request.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.transcription.batch_size == 0 {
            return Err(anyhow::anyhow!("Batch size must be greater than 0"));
        }

        if self.transcription.chunk_size == 0 {
            return Err(anyhow::anyhow!("Chunk size must be greater than 0"));
        }

        for name in &self.transcription.preload_models {
            name.parse::<ModelId>()
                .map_err(|_| anyhow::anyhow!("Unknown model in preload list: {}", name))?;
        }

        Ok(())
    }

    /// The preload list as parsed model identities.
    ///
    /// Invalid entries were rejected by [`AppConfig::validate`]; any that
    /// survive to this point are silently skipped rather than panicking.
    pub fn preload_model_ids(&self) -> Vec<ModelId> {
        self.transcription
            .preload_models
            .iter()
            .filter_map(|name| name.parse::<ModelId>().ok())
            .collect()
    }
}
