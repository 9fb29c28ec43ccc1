//! Setup link endpoints

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde_json::Value;

use gatehouse_core::SetupLink;
use gatehouse_sso::setup_link::{CreateSetupLinkParams, FilterByParams};

use crate::dto::DataResponse;
use crate::error::ApiFailure;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Json(params): Json<CreateSetupLinkParams>,
) -> Result<(StatusCode, Json<DataResponse<SetupLink>>), ApiFailure> {
    let link = state.setup_links.create(params).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(link))))
}

pub async fn filter(
    State(state): State<AppState>,
    Query(params): Query<FilterByParams>,
) -> Result<Json<DataResponse<Vec<SetupLink>>>, ApiFailure> {
    let links = state.setup_links.filter_by(params).await?;
    Ok(Json(DataResponse::new(links)))
}

/// Resolves the self-service token; expired links come back as 401.
pub async fn get_by_token(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> Result<Json<DataResponse<SetupLink>>, ApiFailure> {
    let link = state.setup_links.get_by_token(&token).await?;
    Ok(Json(DataResponse::new(link)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(setup_id): Path<String>,
) -> Result<Json<DataResponse<Value>>, ApiFailure> {
    state.setup_links.remove(&setup_id).await?;
    Ok(Json(DataResponse::new(Value::Null)))
}
