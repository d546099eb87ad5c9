//! Scoring service host
//!
//! Serves a persisted pipeline over HTTP: `POST /score`, `GET /swagger.json`
//! and `GET /health`. This is the local counterpart of the web service the
//! deployment CLI builds.

mod api;
mod error;
mod handlers;
mod state;

pub use api::create_router;
pub use error::ServerError;
pub use state::AppState;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

use crate::scoring::ResponseMode;

/// Scoring service configuration
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub model_dir: PathBuf,
    pub schema_path: Option<PathBuf>,
    pub input_param: String,
    pub response_mode: ResponseMode,
    /// Title of the served OpenAPI document
    pub title: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            host: std::env::var("SCORING_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("SCORING_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(8080),
            model_dir: std::env::var("MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./model")),
            schema_path: Some(
                std::env::var("SCHEMA_PATH")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./schema.json")),
            ),
            input_param: std::env::var("INPUT_PARAM").unwrap_or_else(|_| "input_df".to_string()),
            response_mode: std::env::var("RESPONSE_MODE")
                .ok()
                .and_then(|m| m.parse().ok())
                .unwrap_or_default(),
            title: "Scoring service".to_string(),
        }
    }
}

/// Load the pipeline, then serve until ctrl+c
pub async fn run_server(config: ServiceConfig) -> anyhow::Result<()> {
    let start_time = chrono::Utc::now();
    info!(
        model_dir = %config.model_dir.display(),
        input_param = %config.input_param,
        response_mode = %config.response_mode,
        "Initializing scoring context"
    );

    let state = Arc::new(AppState::load(config.clone())?);
    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(
        address = %addr,
        pid = std::process::id(),
        started_at = %start_time.to_rfc3339(),
        "Scoring service listening"
    );
    info!(url = %format!("http://{}/score", addr), "Scoring endpoint available");

    // Graceful shutdown on ctrl+c
    let shutdown_signal = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for ctrl+c");
            std::future::pending::<()>().await;
        }
        let uptime = chrono::Utc::now().signed_duration_since(start_time);
        info!(uptime_secs = uptime.num_seconds(), "Shutdown signal received, stopping server gracefully");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    info!("Server shut down cleanly");
    Ok(())
}
