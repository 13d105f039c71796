//! persona-chat HTTP server binary.
//!
//! Starts an axum HTTP server in front of the character manager.
//!
//! # Environment Variables
//!
//! See [`persona_chat::config`] for the full list. The common ones:
//!
//! - `PORT`: HTTP port (default: 5000)
//! - `BASE_MODEL` / `BASE_MODEL_DIR`: base model repo id or local directory
//! - `ADAPTER_ROOT`: where the `<id>-lora-adapter` directories live
//! - `PERSONAS_FILE`: YAML persona table replacing the built-in characters
//! - `RUST_LOG`: tracing filter (default: "info,persona_chat=debug")
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --bin server
//! # on an NVIDIA GPU:
//! cargo run --release --bin server --features cuda
//! ```

use std::sync::Arc;

use anyhow::Context;
use persona_chat::config::AppConfig;
use persona_chat::manager::CharacterManager;
use persona_chat::model::candle::CandleLoader;
use persona_chat::model::ModelHost;
use persona_chat::server::{app_router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,persona_chat=debug".into()),
        )
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let registry = Arc::new(
        config
            .build_registry()
            .context("failed to build the persona registry")?,
    );
    for persona in registry.list() {
        if !persona.adapter_available() {
            tracing::warn!(
                "{} has no adapter at {} yet",
                persona.display_name,
                persona.adapter_location.display()
            );
        }
    }

    let host = Arc::new(ModelHost::new(CandleLoader::new(config.model.clone())));
    let manager = CharacterManager::new(registry, host, config.generation);

    let manager = if config.preload_model {
        tokio::task::spawn_blocking(move || manager.preload().map(|_| manager))
            .await
            .context("model preload panicked")?
            .context("failed to preload the base model")?
    } else {
        manager
    };

    serve(&config, manager).await
}

async fn serve(config: &AppConfig, manager: CharacterManager) -> anyhow::Result<()> {
    let app = app_router(AppState::new(manager));
    let bind_addr = config.bind_addr();

    tracing::info!("persona-chat server starting on {}", bind_addr);
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health           : liveness check");
    tracing::info!("  GET  /characters       : list characters");
    tracing::info!("  POST /switch_character : activate a character");
    tracing::info!("  POST /chat             : talk to the active character");
    tracing::info!("  GET  /status           : active character");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server failed")
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
