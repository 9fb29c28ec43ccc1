//! Directory configuration endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use gatehouse_core::{Directory, WebhookEventLog};
use gatehouse_dsync::directories::{CreateDirectoryParams, UpdateDirectoryParams};

use crate::dto::{DataResponse, PageQuery};
use crate::error::ApiFailure;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct ListQuery {
    pub tenant: Option<String>,
    pub product: Option<String>,
    pub offset: usize,
    pub limit: usize,
}

pub async fn create(
    State(state): State<AppState>,
    Json(params): Json<CreateDirectoryParams>,
) -> Result<(StatusCode, Json<DataResponse<Directory>>), ApiFailure> {
    let directory = state.dsync.directories().create(params).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(directory))))
}

pub async fn list(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<DataResponse<Vec<Directory>>>, ApiFailure> {
    let directories = match (&query.tenant, &query.product) {
        (Some(tenant), Some(product)) => {
            state
                .dsync
                .directories()
                .get_by_tenant_and_product(tenant, product)
                .await?
        }
        _ => {
            state
                .dsync
                .directories()
                .list(query.offset, query.limit)
                .await?
        }
    };
    Ok(Json(DataResponse::new(directories)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Directory>>, ApiFailure> {
    let directory = state.dsync.directories().get(&id).await?;
    Ok(Json(DataResponse::new(directory)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(params): Json<UpdateDirectoryParams>,
) -> Result<Json<DataResponse<Directory>>, ApiFailure> {
    let directory = state.dsync.directories().update(&id, params).await?;
    Ok(Json(DataResponse::new(directory)))
}

/// Removes the directory and everything synced under it.
pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Value>>, ApiFailure> {
    state.dsync.directories().get(&id).await?;
    state.dsync.users().delete_all(&id).await?;
    state.dsync.groups().delete_all(&id).await?;
    state.dsync.dispatcher().logger().delete_all(&id).await?;
    state.dsync.directories().delete(&id).await?;
    Ok(Json(DataResponse::new(Value::Null)))
}

pub async fn list_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(page): Query<PageQuery>,
) -> Result<Json<DataResponse<Vec<WebhookEventLog>>>, ApiFailure> {
    state.dsync.directories().get(&id).await?;
    let (events, _) = state
        .dsync
        .dispatcher()
        .logger()
        .get_all(&id, page.offset, page.limit)
        .await?;
    Ok(Json(DataResponse::new(events)))
}

pub async fn clear_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Value>>, ApiFailure> {
    state.dsync.directories().get(&id).await?;
    state.dsync.dispatcher().logger().delete_all(&id).await?;
    Ok(Json(DataResponse::new(Value::Null)))
}
