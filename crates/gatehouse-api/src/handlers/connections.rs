//! Connection management endpoints

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;
use tracing::info;

use gatehouse_core::{Connection, GatehouseError};
use gatehouse_sso::registry::{
    CreateOidcConnectionParams, CreateSamlConnectionParams, DeleteConnectionsParams,
    GetConnectionsParams, UpdateConnectionParams,
};

use crate::dto::DataResponse;
use crate::error::ApiFailure;
use crate::state::AppState;

/// One endpoint for both kinds; the body's metadata fields pick the branch.
pub async fn create(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<(StatusCode, Json<DataResponse<Connection>>), ApiFailure> {
    let connection = if body.get("oidcDiscoveryUrl").is_some() {
        let params: CreateOidcConnectionParams = serde_json::from_value(body)
            .map_err(|e| GatehouseError::invalid_input(e.to_string()))?;
        state.connections.create_oidc_connection(params).await?
    } else {
        let params: CreateSamlConnectionParams = serde_json::from_value(body)
            .map_err(|e| GatehouseError::invalid_input(e.to_string()))?;
        state.connections.create_saml_connection(params).await?
    };
    info!(client_id = %connection.client_id, "Created connection");
    Ok((StatusCode::CREATED, Json(DataResponse::new(connection))))
}

pub async fn get(
    State(state): State<AppState>,
    Query(params): Query<GetConnectionsParams>,
) -> Result<Json<DataResponse<Vec<Connection>>>, ApiFailure> {
    let connections = state.connections.get_connections(params).await?;
    Ok(Json(DataResponse::new(connections)))
}

pub async fn update(
    State(state): State<AppState>,
    Json(params): Json<UpdateConnectionParams>,
) -> Result<Json<DataResponse<Connection>>, ApiFailure> {
    let connection = state.connections.update_connection(params).await?;
    Ok(Json(DataResponse::new(connection)))
}

pub async fn remove(
    State(state): State<AppState>,
    Query(params): Query<DeleteConnectionsParams>,
) -> Result<Json<DataResponse<Value>>, ApiFailure> {
    state.connections.delete_connections(params).await?;
    Ok(Json(DataResponse::new(Value::Null)))
}
