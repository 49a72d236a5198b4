use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{Json, Router, http::StatusCode, response::IntoResponse};
use tower_http::cors::CorsLayer;

use crate::api::{self, AppState};
use crate::config::LeadflowToml;
use crate::pipeline::Pipeline;
use crate::store::SqliteStore;

/// Configuration for the HTTP server.
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub dev_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3150,
            db_path: PathBuf::from(".leadflow/leadflow.db"),
            dev_mode: false,
        }
    }
}

impl ServerConfig {
    pub fn from_toml(config: &LeadflowToml) -> Self {
        Self {
            port: config.port(),
            db_path: config.db_path(),
            dev_mode: config.server.dev_mode,
        }
    }
}

/// Build the full application router.
pub fn build_router(state: Arc<AppState>) -> Router {
    api::api_router().fallback(not_found).with_state(state)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({"error": "No such route"})),
    )
}

/// Open the database, wire the pipeline and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig, settings: &LeadflowToml) -> Result<()> {
    let store = Arc::new(
        SqliteStore::open(&config.db_path).context("Failed to initialize lead database")?,
    );
    let pipeline = Pipeline::from_config(settings, store.clone(), store)?;
    let state = Arc::new(AppState { pipeline });

    let mut app = build_router(state);

    if config.dev_mode {
        app = app.layer(CorsLayer::permissive());
    }

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(addr = %local_addr, db = %config.db_path.display(), "Server listening");
    println!("leadflow running at http://{}", local_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
    println!("\nShutting down...");
}
