//! SCIM 2.0 endpoints
//!
//! Every request is gated on the directory's bearer secret before any
//! routing happens; failures use the SCIM error schema rather than the
//! management API envelope.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use gatehouse_core::Directory;
use gatehouse_dsync::scim::ERROR_SCHEMA;
use gatehouse_dsync::{ScimMethod, ScimRequest, ScimResource, ScimResponse};

use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ScimQuery {
    pub filter: Option<String>,
    #[serde(rename = "startIndex")]
    pub start_index: Option<usize>,
    pub count: Option<usize>,
}

fn scim_error(status: u16, detail: &str) -> Response {
    let code = StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = json!({
        "schemas": [ERROR_SCHEMA],
        "detail": detail,
        "status": status,
    });
    (code, Json(body)).into_response()
}

fn to_response(response: ScimResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(response.body)).into_response()
}

fn scim_method(method: &Method) -> Option<ScimMethod> {
    match *method {
        Method::GET => Some(ScimMethod::Get),
        Method::POST => Some(ScimMethod::Post),
        Method::PUT => Some(ScimMethod::Put),
        Method::PATCH => Some(ScimMethod::Patch),
        Method::DELETE => Some(ScimMethod::Delete),
        _ => None,
    }
}

async fn authenticate(
    state: &AppState,
    directory_id: &str,
    headers: &HeaderMap,
) -> Result<Directory, Response> {
    let directory = state
        .dsync
        .directories()
        .get(directory_id)
        .await
        .map_err(|e| scim_error(e.status_code(), &e.to_string()))?;

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();
    state
        .dsync
        .directories()
        .validate_api_secret(&directory, bearer)
        .map_err(|e| scim_error(e.status_code(), &e.to_string()))?;
    Ok(directory)
}

#[allow(clippy::too_many_arguments)]
async fn dispatch(
    state: AppState,
    directory_id: String,
    resource: ScimResource,
    resource_id: Option<String>,
    method: Method,
    headers: HeaderMap,
    query: ScimQuery,
    body: String,
) -> Response {
    let directory = match authenticate(&state, &directory_id, &headers).await {
        Ok(directory) => directory,
        Err(response) => return response,
    };
    let Some(method) = scim_method(&method) else {
        return scim_error(405, "Method not allowed");
    };
    let body = if body.trim().is_empty() {
        None
    } else {
        match serde_json::from_str::<Value>(&body) {
            Ok(value) => Some(value),
            Err(_) => return scim_error(400, "Invalid request body"),
        }
    };

    let request = ScimRequest {
        method,
        resource,
        resource_id,
        filter: query.filter,
        start_index: query.start_index.unwrap_or(1),
        count: query.count.unwrap_or(0),
        body,
    };
    to_response(state.dsync.handle_request(&directory, request).await)
}

pub async fn users_collection(
    State(state): State<AppState>,
    Path(directory_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<ScimQuery>,
    body: String,
) -> Response {
    dispatch(
        state,
        directory_id,
        ScimResource::Users,
        None,
        method,
        headers,
        query,
        body,
    )
    .await
}

pub async fn users_resource(
    State(state): State<AppState>,
    Path((directory_id, resource_id)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<ScimQuery>,
    body: String,
) -> Response {
    dispatch(
        state,
        directory_id,
        ScimResource::Users,
        Some(resource_id),
        method,
        headers,
        query,
        body,
    )
    .await
}

pub async fn groups_collection(
    State(state): State<AppState>,
    Path(directory_id): Path<String>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<ScimQuery>,
    body: String,
) -> Response {
    dispatch(
        state,
        directory_id,
        ScimResource::Groups,
        None,
        method,
        headers,
        query,
        body,
    )
    .await
}

pub async fn groups_resource(
    State(state): State<AppState>,
    Path((directory_id, resource_id)): Path<(String, String)>,
    method: Method,
    headers: HeaderMap,
    Query(query): Query<ScimQuery>,
    body: String,
) -> Response {
    dispatch(
        state,
        directory_id,
        ScimResource::Groups,
        Some(resource_id),
        method,
        headers,
        query,
        body,
    )
    .await
}
