//! Request handlers

pub mod connections;
pub mod directories;
pub mod federation;
pub mod oauth;
pub mod scim;
pub mod setup_links;

use axum::Json;
use serde_json::{json, Value};

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}
