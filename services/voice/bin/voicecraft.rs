//! Main Entrypoint for the Voicecraft Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Starting the scene runtime and warming up the classifier.
//! 3. Wiring the microphone and realtime transcriber into the listening controller.
//! 4. Constructing the Axum router and applying middleware.
//! 5. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};
use voicecraft_core::{
    dispatcher::{CommandDispatcher, SceneConfig},
    extraction::{GenerationOptions, OpenAIExtractor},
    listening::{ListeningConfig, ListeningController},
    runtime::SceneHandle,
};
use voicecraft_service::{
    capture::{DevicePermission, MicrophoneCapture},
    config::Config,
    router::create_router,
    state::AppState,
    transcription::RealtimeTranscriber,
};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C");
        return;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing scene...");

    // --- 3. Start the Scene ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.openai_api_base);
    let extractor = Arc::new(OpenAIExtractor::new(
        openai_config,
        config.extraction_model.clone(),
    ));
    let options = GenerationOptions {
        temperature: config.extraction_temperature,
        timeout: config.extraction_timeout,
    };
    let scene_config = SceneConfig {
        seed: config.scene_seed,
        ..Default::default()
    };
    let scene = SceneHandle::spawn(CommandDispatcher::new(extractor, options, scene_config));

    // Pays the first-call latency before anyone speaks.
    let warmup = scene.clone();
    tokio::spawn(async move {
        match warmup.warmup().await {
            Ok(()) => info!("Classifier warmed up."),
            Err(e) => warn!(error = %e, "Classifier warmup failed"),
        }
    });

    // --- 4. Wire the Listening Pipeline ---
    let listening = ListeningController::new(
        Arc::new(DevicePermission),
        Box::new(MicrophoneCapture::new()),
        Box::new(RealtimeTranscriber::new(
            config.realtime_url.clone(),
            config.openai_api_key.clone(),
            config.transcription_model.clone(),
            config.transcription_language.clone(),
        )),
        Arc::new(scene.clone()),
        ListeningConfig {
            volatile_processing: config.volatile_commands,
            volatile_cooldown: config.volatile_cooldown,
            ..Default::default()
        },
    );

    let app_state = Arc::new(AppState::new(scene, listening));

    // --- 5. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state.clone()).layer(cors);

    // --- 6. Start Server ---
    info!(
        model = %config.extraction_model,
        realtime_url = %config.realtime_url,
        transcription_model = %config.transcription_model,
        language = %config.transcription_language,
        volatile_commands = config.volatile_commands,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    app_state.listening.lock().await.stop().await;
    info!("Server has shut down.");
    Ok(())
}
