//! OAuth2 endpoints bridging relying apps to upstream IdPs

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{Html, IntoResponse, Redirect, Response},
    Form, Json,
};

use gatehouse_core::GatehouseError;
use gatehouse_sso::oauth::{
    AuthorizeRedirect, AuthorizeRequest, OidcCallbackPayload, SamlResponsePayload, TokenRequest,
};

use crate::error::ApiFailure;
use crate::state::AppState;

pub async fn authorize(
    State(state): State<AppState>,
    Query(request): Query<AuthorizeRequest>,
) -> Result<Response, ApiFailure> {
    match state.oauth.authorize(request).await? {
        AuthorizeRedirect::Url(url) => Ok(Redirect::to(&url).into_response()),
        AuthorizeRedirect::PostForm { html } => Ok(Html(html).into_response()),
    }
}

/// ACS endpoint for the upstream IdP's SAML response.
pub async fn saml_response(
    State(state): State<AppState>,
    Form(payload): Form<SamlResponsePayload>,
) -> Result<Redirect, ApiFailure> {
    let url = state.oauth.saml_response(payload).await?;
    Ok(Redirect::to(&url))
}

/// Callback for the upstream OIDC authorization-code leg.
pub async fn oidc_callback(
    State(state): State<AppState>,
    Query(payload): Query<OidcCallbackPayload>,
) -> Result<Redirect, ApiFailure> {
    let url = state.oauth.oidc_authz_response(payload).await?;
    Ok(Redirect::to(&url))
}

pub async fn token(
    State(state): State<AppState>,
    Form(request): Form<TokenRequest>,
) -> Result<Response, ApiFailure> {
    let response = state.oauth.token(request).await?;
    Ok(Json(response).into_response())
}

pub async fn userinfo(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, ApiFailure> {
    let token = bearer_token(&headers)?;
    let profile = state.oauth.user_info(token).await?;
    Ok(Json(profile).into_response())
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, ApiFailure> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiFailure(GatehouseError::unauthorized("Unauthorized")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Bearer abc123"));
        assert_eq!(bearer_token(&headers).unwrap(), "abc123");

        let empty = HeaderMap::new();
        assert!(bearer_token(&empty).is_err());
    }
}
