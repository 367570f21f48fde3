//! HTTP API endpoint handlers.

use std::sync::Arc;

use axum::{Json, extract::State};

use crate::{domain::Value, ui::state::AppState};

/// Debug endpoint returning the whole store tree (for testing purposes)
pub async fn debug_store(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(state.store.snapshot().await)
}

/// Health check endpoint
pub async fn health_check() -> Json<Value> {
    Json(serde_json::json!({"status": "ok"}))
}
