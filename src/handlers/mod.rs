// src/handlers/mod.rs
use axum::Json;
use serde_json::{json, Value};

pub mod auth;
pub mod chat;
pub mod notifications;
pub mod tasks;
pub mod users;

// GET /api/health
pub async fn health_handler() -> Json<Value> {
    Json(json!({ "state": true, "message": "ok" }))
}
