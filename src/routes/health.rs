use axum::{extract::State, response::Json};
use chrono::Utc;
use serde_json::{Value, json};

use crate::server::AppState;

/// Liveness check.
///
/// `GET /ping` → `{"status":"pong"}`. Never rate limited.
pub async fn ping() -> Json<Value> {
    Json(json!({ "status": "pong" }))
}

/// Health check with build and environment details. Never rate limited.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "environment": format!("{:?}", state.config.server.environment).to_lowercase(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
