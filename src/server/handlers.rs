//! HTTP request handlers

use axum::{extract::State, Json};
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use crate::data::rows_to_frame;
use crate::scoring::{ScoreOutcome, ScoreResponse};

use super::error::{Result, ServerError};
use super::state::AppState;

/// Score the rows found under the configured input parameter
pub async fn score(State(state): State<Arc<AppState>>, Json(body): Json<Value>) -> Result<Json<ScoreResponse>> {
    let param = &state.config.input_param;
    let rows = body
        .as_object()
        .ok_or_else(|| ServerError::BadRequest("Request body must be a JSON object".to_string()))?
        .get(param)
        .ok_or_else(|| ServerError::BadRequest(format!("Missing input parameter '{}'", param)))?
        .as_array()
        .ok_or_else(|| ServerError::BadRequest(format!("Input parameter '{}' must be an array of rows", param)))?
        .clone();

    debug!(rows = rows.len(), "Scoring request received");

    let scoring = state.scoring.clone();
    let outcome = tokio::task::spawn_blocking(move || match rows_to_frame(&rows) {
        Ok(df) => scoring.run(&df),
        Err(e) => ScoreOutcome::Failed(e.to_string()),
    })
    .await
    .map_err(|e| ServerError::Internal(format!("Scoring task failed: {}", e)))?;

    state.record(&outcome);
    Ok(Json(ScoreResponse::from_outcome(outcome, state.config.response_mode)))
}

/// OpenAPI document built from the schema file
pub async fn swagger(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let schema = state
        .schema
        .as_ref()
        .ok_or_else(|| ServerError::NotFound("No schema loaded for this service".to_string()))?;
    Ok(Json(schema.swagger_spec(&state.config.title)))
}

pub async fn health_check(State(state): State<Arc<AppState>>) -> Json<Value> {
    let uptime = chrono::Utc::now().signed_duration_since(state.started_at);
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime.num_seconds(),
        "requests_served": state.requests_served(),
        "requests_failed": state.requests_failed(),
        "input_columns": state.scoring.input_columns(),
    }))
}
