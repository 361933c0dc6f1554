//! # Speech Transcription Backend - Main Application Entry Point
//!
//! Sets up an Actix-web HTTP server exposing a speech-to-text API around the
//! in-process model-lifecycle manager.
//!
//! ## Application Architecture:
//! - **config**: application configuration (TOML file + environment variables)
//! - **device**: compute device and precision selection
//! - **state**: shared application state
//! - **audio**: upload ingestion, waveform decode, vocal separation
//! - **transcription**: model cache, engine, pipelines, formatting, façade
//! - **handlers** / **health**: HTTP endpoints
//! - **error**: error taxonomy and HTTP error responses
//!
//! ## Lifecycle:
//! Startup constructs the transcription service and eagerly preloads the
//! configured models; shutdown evicts the model caches. These are the only
//! two points where the core touches process lifecycle.

mod audio;
mod config;
mod device;
mod error;
mod handlers;
mod health;
mod state;
mod transcription;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use transcription::TranscriptionService;

/// Global shutdown signal set by the SIGTERM/SIGINT handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!(
        "Starting speech-transcription-backend v{}",
        env!("CARGO_PKG_VERSION")
    );
    info!(
        "Configuration loaded: {}:{}",
        config.server.host, config.server.port
    );

    // Startup hook: construct the service and warm the model caches before
    // accepting traffic. Model loading is synchronous by design.
    let service = Arc::new(
        TranscriptionService::from_config(&config)
            .map_err(|e| anyhow::anyhow!("service construction failed: {}", e))?,
    );
    service
        .preload()
        .map_err(|e| anyhow::anyhow!("model preload failed: {}", e))?;

    let app_state = AppState::new(config.clone(), Arc::clone(&service));
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/models", web::get().to(handlers::list_models))
                    .route("/languages", web::get().to(handlers::list_languages))
                    .route("/transcribe", web::post().to(handlers::transcribe)),
            )
            // health check at root level for probes
            .route("/health", web::get().to(health::health_check))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    // Shutdown hook: drop cached models and release accelerator memory.
    service.shutdown();

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing subscriber; `RUST_LOG` overrides the default
/// filter.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "speech_transcription_backend=debug,actix_web=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Listen for SIGTERM/SIGINT and flip the global shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without blocking other tasks.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
