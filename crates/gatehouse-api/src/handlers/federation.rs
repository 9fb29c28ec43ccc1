//! SAML federation endpoints (broker acting as IdP)

use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use gatehouse_core::FederatedApp;
use gatehouse_sso::federation::{CreateAppParams, UpdateAppParams};
use gatehouse_sso::oauth::{AuthorizeRedirect, AuthorizeRequest};

use crate::dto::{DataResponse, PageQuery};
use crate::error::ApiFailure;
use crate::state::AppState;

pub async fn create(
    State(state): State<AppState>,
    Json(params): Json<CreateAppParams>,
) -> Result<(StatusCode, Json<DataResponse<FederatedApp>>), ApiFailure> {
    let app = state.federation.create(params).await?;
    Ok((StatusCode::CREATED, Json(DataResponse::new(app))))
}

pub async fn list(
    State(state): State<AppState>,
    Query(page): Query<PageQuery>,
) -> Result<Json<DataResponse<Vec<FederatedApp>>>, ApiFailure> {
    let apps = state.federation.get_all(page.offset, page.limit).await?;
    Ok(Json(DataResponse::new(apps)))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<FederatedApp>>, ApiFailure> {
    let app = state.federation.get(&id).await?;
    Ok(Json(DataResponse::new(app)))
}

pub async fn update(
    State(state): State<AppState>,
    Json(params): Json<UpdateAppParams>,
) -> Result<Json<DataResponse<FederatedApp>>, ApiFailure> {
    let app = state.federation.update(params).await?;
    Ok(Json(DataResponse::new(app)))
}

pub async fn remove(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DataResponse<Value>>, ApiFailure> {
    state.federation.delete(&id).await?;
    Ok(Json(DataResponse::new(Value::Null)))
}

pub async fn metadata(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiFailure> {
    let metadata = state.federation.get_metadata(&id).await?;
    Ok((
        [(header::CONTENT_TYPE, "text/xml; charset=utf-8")],
        metadata.xml,
    )
        .into_response())
}

#[derive(Debug, Deserialize)]
pub struct FederatedSsoQuery {
    #[serde(rename = "SAMLRequest")]
    pub saml_request: String,
    #[serde(default)]
    pub idp_hint: Option<String>,
}

/// SP-initiated SSO into the broker: resolve the inbound AuthnRequest to a
/// registered app, then continue as an ordinary authorize() against the
/// app's tenant/product connections.
pub async fn sso(
    State(state): State<AppState>,
    Query(query): Query<FederatedSsoQuery>,
) -> Result<Response, ApiFailure> {
    let resolved = state.federation.resolve_sso_request(&query.saml_request).await?;

    let client_id = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("tenant", &resolved.app.tenant)
        .append_pair("product", &resolved.app.product)
        .finish();
    let request = AuthorizeRequest {
        response_type: Some("code".to_string()),
        client_id,
        redirect_uri: Some(resolved.app.acs_url.clone()),
        state: Some(resolved.request_id),
        idp_hint: query.idp_hint,
        ..Default::default()
    };

    match state.oauth.authorize(request).await? {
        AuthorizeRedirect::Url(url) => Ok(Redirect::to(&url).into_response()),
        AuthorizeRedirect::PostForm { html } => Ok(Html(html).into_response()),
    }
}
