//! Main Entrypoint for the Livebridge Relay
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Choosing the agent backend (local or remote).
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use livebridge_api::{
    config::{AgentMode, Config},
    router::create_router,
    state::AppState,
    ws::backend::{BackendStrategy, remote::TungsteniteConnector},
};
use livebridge_core::backend::EchoAgent;
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl+C; shutdown signal disabled.");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

fn backend_for(config: &Config) -> anyhow::Result<BackendStrategy> {
    match config.mode {
        AgentMode::Local => {
            info!(warmup_ms = config.local_warmup.as_millis() as u64, "Using local echo agent.");
            Ok(BackendStrategy::Local {
                agent: Arc::new(EchoAgent),
                warmup: config.local_warmup,
            })
        }
        AgentMode::Remote => {
            let target = config
                .remote
                .clone()
                .context("remote mode requires a resolved remote agent")?;
            info!(resource = %target.resource, endpoint = %target.endpoint, "Using remote agent.");
            if config.remote_access_token.is_none() {
                warn!("REMOTE_ACCESS_TOKEN is not set; connecting without credentials.");
            }
            Ok(BackendStrategy::Remote {
                connector: Arc::new(TungsteniteConnector::new(
                    target,
                    config.remote_access_token.clone(),
                )),
            })
        }
    }
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
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Choose the Backend ---
    let app_state = Arc::new(AppState {
        backend: backend_for(&config)?,
        retry_policy: config.retry.clone(),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        mode = ?config.mode,
        max_retries = config.retry.max_retries,
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

    info!("Server has shut down.");
    Ok(())
}
