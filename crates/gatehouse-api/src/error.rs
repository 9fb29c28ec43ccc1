//! HTTP error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use gatehouse_core::GatehouseError;

/// Wraps a [`GatehouseError`] so handlers can use `?` and still produce the
/// `{error: {message, code}}` envelope.
#[derive(Debug)]
pub struct ApiFailure(pub GatehouseError);

impl From<GatehouseError> for ApiFailure {
    fn from(err: GatehouseError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        let code = self.0.status_code();
        let status = StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": {
                "message": self.0.to_string(),
                "code": code,
            }
        });
        (status, Json(body)).into_response()
    }
}
