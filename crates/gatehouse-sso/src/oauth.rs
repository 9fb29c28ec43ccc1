//! OAuth2 protocol controller
//!
//! The central state machine: authorize → IdP redirect → SAML/OIDC response →
//! code issuance → token exchange → userinfo. Once a `redirect_uri` is known
//! and validated, failures become OAuth error redirects so the relying
//! application keeps control of the UX; before that they are thrown.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, instrument, warn};

use gatehouse_core::{
    random_secret, Connection, GatehouseError, Profile, Result, Strategy,
};
use gatehouse_store::{DatabaseDriver, EncryptionKey, Store};

use crate::jwt::IdTokenService;
use crate::oidc::{generate_pkce, UpstreamOidcClient};
use crate::registry::ConnectionRegistry;
use crate::saml::{build_authn_request, decode_post_response, deflate_and_encode, SamlValidator};

pub const SESSION_NAMESPACE: &str = "oauth:session";
pub const CODE_NAMESPACE: &str = "oauth:code";
pub const TOKEN_NAMESPACE: &str = "oauth:token";

/// RelayState values minted by this broker carry this prefix; anything else
/// is an unsolicited IdP-initiated response.
pub const RELAY_STATE_PREFIX: &str = "gatehouse_";

#[derive(Debug, Clone)]
pub struct OAuthControllerConfig {
    /// Public base URL of this broker
    pub external_url: String,
    /// SP entityID / token issuer
    pub saml_audience: String,
    pub access_token_ttl: u64,
    pub code_ttl: u64,
    pub session_ttl: u64,
}

impl Default for OAuthControllerConfig {
    fn default() -> Self {
        Self {
            external_url: "http://localhost:5225".to_string(),
            saml_audience: "https://saml.gatehouse.dev".to_string(),
            access_token_ttl: 300,
            code_ttl: 300,
            session_ttl: 300,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct AuthorizeRequest {
    pub response_type: Option<String>,
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub state: Option<String>,
    pub scope: Option<String>,
    pub code_challenge: Option<String>,
    pub code_challenge_method: Option<String>,
    pub idp_hint: Option<String>,
    pub tenant: Option<String>,
    pub product: Option<String>,
    /// Legacy carriers for the encoded tenant/product pair
    pub access_type: Option<String>,
    pub resource: Option<String>,
}

/// Where to send the browser next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizeRedirect {
    Url(String),
    /// Auto-submitting form for the SAML POST binding
    PostForm { html: String },
}

#[derive(Debug, Default, Deserialize)]
pub struct SamlResponsePayload {
    #[serde(rename = "SAMLResponse")]
    pub saml_response: String,
    #[serde(rename = "RelayState", default)]
    pub relay_state: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct OidcCallbackPayload {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

/// Pending flow, keyed by the state/RelayState round-tripped via the IdP.
#[derive(Debug, Serialize, Deserialize)]
struct PendingFlow {
    connection_client_id: String,
    redirect_uri: String,
    state: String,
    scope: Vec<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    /// PKCE verifier for the upstream OIDC leg
    code_verifier: Option<String>,
    /// AuthnRequest id, for InResponseTo checks at the validator seam
    request_id: Option<String>,
    requested: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct CodeRecord {
    connection_client_id: String,
    redirect_uri: String,
    scope: Vec<String>,
    code_challenge: Option<String>,
    code_challenge_method: Option<String>,
    profile: Profile,
}

#[derive(Debug, Serialize, Deserialize)]
struct TokenRecord {
    profile: Profile,
}

pub struct OAuthController {
    registry: ConnectionRegistry,
    sessions: Store,
    codes: Store,
    tokens: Store,
    validator: Arc<dyn SamlValidator>,
    oidc: UpstreamOidcClient,
    id_tokens: IdTokenService,
    config: OAuthControllerConfig,
}

fn redirect_with(redirect_uri: &str, pairs: &[(&str, &str)]) -> Result<String> {
    let mut url = url::Url::parse(redirect_uri)
        .map_err(|_| GatehouseError::invalid_input("Please specify a valid redirect URL."))?;
    url.query_pairs_mut().extend_pairs(pairs);
    Ok(url.to_string())
}

fn oauth_error_redirect(
    redirect_uri: &str,
    error: &str,
    description: &str,
    state: Option<&str>,
) -> Result<AuthorizeRedirect> {
    let mut pairs = vec![("error", error), ("error_description", description)];
    if let Some(state) = state {
        pairs.push(("state", state));
    }
    Ok(AuthorizeRedirect::Url(redirect_with(redirect_uri, &pairs)?))
}

/// `tenant=..&product=..` pairs carried in a client_id, access_type or
/// resource parameter.
fn encoded_tenant_product(value: &str) -> Option<(String, String)> {
    if !value.contains("tenant=") {
        return None;
    }
    let pairs: HashMap<_, _> = url::form_urlencoded::parse(value.as_bytes())
        .into_owned()
        .collect();
    match (pairs.get("tenant"), pairs.get("product")) {
        (Some(tenant), Some(product)) => Some((tenant.clone(), product.clone())),
        _ => None,
    }
}

fn parse_scope(scope: Option<&str>) -> Vec<String> {
    scope
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

impl OAuthController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        driver: Arc<dyn DatabaseDriver>,
        encryption: Option<EncryptionKey>,
        registry: ConnectionRegistry,
        validator: Arc<dyn SamlValidator>,
        id_tokens: IdTokenService,
        config: OAuthControllerConfig,
    ) -> Self {
        let sessions = Store::new(
            driver.clone(),
            SESSION_NAMESPACE,
            Some(config.session_ttl),
            encryption.clone(),
        );
        let codes = Store::new(
            driver.clone(),
            CODE_NAMESPACE,
            Some(config.code_ttl),
            encryption.clone(),
        );
        let tokens = Store::new(
            driver,
            TOKEN_NAMESPACE,
            Some(config.access_token_ttl),
            encryption,
        );
        Self {
            registry,
            sessions,
            codes,
            tokens,
            validator,
            oidc: UpstreamOidcClient::new(),
            id_tokens,
            config,
        }
    }

    /// Resolve the target connection from the `client_id` forms we accept:
    /// a raw clientID, the `tenant=..&product=..` encoding, or (for legacy
    /// callers sending a placeholder client_id) explicit tenant/product
    /// parameters, with `idp_hint` picking among multiple IdPs.
    async fn resolve_connection(&self, request: &AuthorizeRequest) -> Result<Connection> {
        let client_id = request.client_id.trim();
        let encoded = encoded_tenant_product(client_id);

        let connections = if client_id.is_empty() || client_id == "dummy" {
            let pair = request
                .tenant
                .as_deref()
                .filter(|t| !t.is_empty())
                .zip(request.product.as_deref().filter(|p| !p.is_empty()))
                .map(|(t, p)| (t.to_string(), p.to_string()))
                .or_else(|| {
                    request
                        .access_type
                        .as_deref()
                        .and_then(encoded_tenant_product)
                })
                .or_else(|| request.resource.as_deref().and_then(encoded_tenant_product));
            let (tenant, product) = pair.ok_or_else(|| {
                GatehouseError::invalid_input(
                    "Please provide `clientID` or `tenant` and `product`.",
                )
            })?;
            self.registry.get_by_tenant_product(&tenant, &product).await?
        } else if let Some((tenant, product)) = encoded {
            self.registry.get_by_tenant_product(&tenant, &product).await?
        } else {
            self.registry
                .get_by_client_id(client_id)
                .await?
                .into_iter()
                .collect()
        };

        let connection = match request.idp_hint.as_deref() {
            Some(hint) => connections.into_iter().find(|c| c.client_id == hint),
            None => {
                // Without a hint, pick deterministically
                let mut connections = connections;
                connections.sort_by(|a, b| a.client_id.cmp(&b.client_id));
                connections.into_iter().next()
            }
        };
        connection.ok_or_else(|| GatehouseError::forbidden("IdP connection not found."))
    }

    #[instrument(skip(self, request), fields(client_id = %request.client_id))]
    pub async fn authorize(&self, request: AuthorizeRequest) -> Result<AuthorizeRedirect> {
        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| GatehouseError::invalid_input("Please specify a redirect URL."))?;

        let state = match request.state.as_deref().filter(|s| !s.is_empty()) {
            Some(state) => state,
            None => {
                return oauth_error_redirect(
                    redirect_uri,
                    "invalid_request",
                    "Please specify a state to safeguard against XSRF attacks",
                    None,
                )
            }
        };

        if request.response_type.as_deref().unwrap_or("code") != "code" {
            return oauth_error_redirect(
                redirect_uri,
                "unsupported_response_type",
                "Only Authorization Code grant is supported",
                Some(state),
            );
        }

        let connection = self.resolve_connection(&request).await?;

        let allowed = connection.redirect_url.iter().any(|u| u == redirect_uri)
            || connection.default_redirect_url == redirect_uri;
        if !allowed {
            return Err(GatehouseError::forbidden("Redirect URL is not allowed."));
        }

        let mut requested = HashMap::new();
        requested.insert("client_id".to_string(), request.client_id.clone());
        requested.insert("state".to_string(), state.to_string());
        requested.insert("tenant".to_string(), connection.tenant.clone());
        requested.insert("product".to_string(), connection.product.clone());

        let session_id = random_secret(16);
        let mut flow = PendingFlow {
            connection_client_id: connection.client_id.clone(),
            redirect_uri: redirect_uri.to_string(),
            state: state.to_string(),
            scope: parse_scope(request.scope.as_deref()),
            code_challenge: request.code_challenge.clone(),
            code_challenge_method: request.code_challenge_method.clone(),
            code_verifier: None,
            request_id: None,
            requested,
        };

        match connection.strategy() {
            Strategy::Saml => {
                let metadata = connection.saml_metadata().ok_or_else(|| {
                    GatehouseError::internal("SAML connection without metadata")
                })?;
                let destination = metadata
                    .sso
                    .redirect_url
                    .as_deref()
                    .or(metadata.sso.post_url.as_deref())
                    .ok_or_else(|| {
                        GatehouseError::internal("Connection has no SSO endpoint")
                    })?
                    .to_string();

                let (request_id, xml) = build_authn_request(
                    &self.config.saml_audience,
                    &format!("{}/api/oauth/saml", self.config.external_url),
                    &destination,
                    connection.force_authn,
                );
                flow.request_id = Some(request_id);
                self.sessions.put(&session_id, &flow, &[]).await?;
                let relay_state = format!("{RELAY_STATE_PREFIX}{session_id}");

                if metadata.sso.redirect_url.is_some() {
                    let encoded = match deflate_and_encode(&xml) {
                        Ok(encoded) => encoded,
                        Err(e) => {
                            warn!(error = %e, "Failed to build SAML request");
                            return oauth_error_redirect(
                                redirect_uri,
                                "server_error",
                                &e.to_string(),
                                Some(state),
                            );
                        }
                    };
                    let url = redirect_with(
                        &destination,
                        &[("SAMLRequest", encoded.as_str()), ("RelayState", &relay_state)],
                    )?;
                    Ok(AuthorizeRedirect::Url(url))
                } else {
                    let b64 = base64_encode(&xml);
                    Ok(AuthorizeRedirect::PostForm {
                        html: post_form(&destination, &b64, &relay_state),
                    })
                }
            }
            Strategy::Oidc => {
                let provider = connection.oidc_provider().ok_or_else(|| {
                    GatehouseError::internal("OIDC connection without provider")
                })?;
                let discovery = match self.oidc.discover(&provider.discovery_url).await {
                    Ok(discovery) => discovery,
                    Err(e) => {
                        return oauth_error_redirect(
                            redirect_uri,
                            "server_error",
                            &e.to_string(),
                            Some(state),
                        )
                    }
                };
                let pkce = generate_pkce();
                flow.code_verifier = Some(pkce.verifier.clone());
                self.sessions.put(&session_id, &flow, &[]).await?;

                let url = self.oidc.authorization_url(
                    &discovery,
                    provider,
                    &format!("{}/api/oauth/oidc", self.config.external_url),
                    &session_id,
                    &pkce.challenge,
                );
                Ok(AuthorizeRedirect::Url(url))
            }
        }
    }

    #[instrument(skip(self, payload))]
    pub async fn saml_response(&self, payload: SamlResponsePayload) -> Result<String> {
        let session_id = payload
            .relay_state
            .strip_prefix(RELAY_STATE_PREFIX)
            .ok_or_else(|| {
                GatehouseError::forbidden(
                    "IdP (Identity Provider) flow has been disabled. Please head to your Service Provider to login.",
                )
            })?;

        let flow: PendingFlow = self
            .sessions
            .get(session_id)
            .await?
            .ok_or_else(|| {
                GatehouseError::forbidden("Unable to validate state from the origin request.")
            })?;

        let connection = self
            .registry
            .get_by_client_id(&flow.connection_client_id)
            .await?
            .ok_or_else(|| GatehouseError::forbidden("SAML connection not found."))?;
        let metadata = connection
            .saml_metadata()
            .ok_or_else(|| GatehouseError::internal("SAML connection without metadata"))?;

        let xml = decode_post_response(&payload.saml_response)?;
        let attributes = match self.validator.validate(&xml, metadata) {
            Ok(attributes) => attributes,
            Err(e) => {
                warn!(error = %e, "SAML response validation failed");
                let AuthorizeRedirect::Url(url) = oauth_error_redirect(
                    &flow.redirect_uri,
                    "access_denied",
                    &e.to_string(),
                    Some(&flow.state),
                )?
                else {
                    unreachable!()
                };
                return Ok(url);
            }
        };

        let profile = Profile {
            id: attributes.name_id,
            email: attributes.email,
            first_name: attributes.first_name,
            last_name: attributes.last_name,
            requested: flow.requested.clone(),
            raw: attributes.raw,
        };

        self.issue_code(session_id, flow, profile).await
    }

    #[instrument(skip(self, payload))]
    pub async fn oidc_authz_response(&self, payload: OidcCallbackPayload) -> Result<String> {
        let session_id = payload
            .state
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| {
                GatehouseError::forbidden("Unable to validate state from the origin request.")
            })?;
        let flow: PendingFlow = self.sessions.get(session_id).await?.ok_or_else(|| {
            GatehouseError::forbidden("Unable to validate state from the origin request.")
        })?;

        if let Some(error) = payload.error.as_deref().filter(|e| !e.is_empty()) {
            let description = payload.error_description.as_deref().unwrap_or(error);
            let AuthorizeRedirect::Url(url) = oauth_error_redirect(
                &flow.redirect_uri,
                "access_denied",
                description,
                Some(&flow.state),
            )?
            else {
                unreachable!()
            };
            return Ok(url);
        }

        let code = payload.code.as_deref().filter(|c| !c.is_empty());
        let connection = self
            .registry
            .get_by_client_id(&flow.connection_client_id)
            .await?
            .ok_or_else(|| GatehouseError::forbidden("OIDC connection not found."))?;
        let provider = connection
            .oidc_provider()
            .ok_or_else(|| GatehouseError::internal("OIDC connection without provider"))?;

        let exchange = async {
            let code =
                code.ok_or_else(|| GatehouseError::upstream("Authorization code missing"))?;
            let verifier = flow
                .code_verifier
                .as_deref()
                .ok_or_else(|| GatehouseError::internal("Pending flow lost its verifier"))?;
            let discovery = self.oidc.discover(&provider.discovery_url).await?;
            self.oidc
                .exchange_code(
                    &discovery,
                    provider,
                    code,
                    verifier,
                    &format!("{}/api/oauth/oidc", self.config.external_url),
                )
                .await
        };

        let mut profile = match exchange.await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Upstream OIDC exchange failed");
                let AuthorizeRedirect::Url(url) = oauth_error_redirect(
                    &flow.redirect_uri,
                    "access_denied",
                    &e.to_string(),
                    Some(&flow.state),
                )?
                else {
                    unreachable!()
                };
                return Ok(url);
            }
        };
        profile.requested = flow.requested.clone();

        self.issue_code(session_id, flow, profile).await
    }

    async fn issue_code(
        &self,
        session_id: &str,
        flow: PendingFlow,
        profile: Profile,
    ) -> Result<String> {
        let code = random_secret(20);
        let record = CodeRecord {
            connection_client_id: flow.connection_client_id,
            redirect_uri: flow.redirect_uri.clone(),
            scope: flow.scope,
            code_challenge: flow.code_challenge,
            code_challenge_method: flow.code_challenge_method,
            profile,
        };
        self.codes.put(&code, &record, &[]).await?;
        self.sessions.delete(session_id).await?;
        info!("Issued authorization code");
        redirect_with(
            &flow.redirect_uri,
            &[("code", code.as_str()), ("state", flow.state.as_str())],
        )
    }

    #[instrument(skip(self, request))]
    pub async fn token(&self, request: TokenRequest) -> Result<TokenResponse> {
        if request.grant_type.as_deref() != Some("authorization_code") {
            return Err(GatehouseError::invalid_input(
                "Unsupported grant_type: authorization_code is required",
            ));
        }
        let code = request
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or_else(|| GatehouseError::invalid_input("Please specify code"))?;

        let record: CodeRecord = self
            .codes
            .get(code)
            .await?
            .ok_or_else(|| GatehouseError::forbidden("Invalid code"))?;

        let redirect_uri = request
            .redirect_uri
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| GatehouseError::invalid_input("Please specify redirect_uri"))?;
        if redirect_uri != record.redirect_uri {
            return Err(GatehouseError::invalid_input("redirect_uri mismatch"));
        }

        let connection = self
            .registry
            .get_by_client_id(&record.connection_client_id)
            .await?
            .ok_or_else(|| GatehouseError::forbidden("IdP connection not found."))?;

        self.authenticate_client(&request, &record, &connection)?;

        // Single-use: the code dies before the token is born
        self.codes.delete(code).await?;

        let access_token = random_secret(20);
        self.tokens
            .put(
                &access_token,
                &TokenRecord {
                    profile: record.profile.clone(),
                },
                &[],
            )
            .await?;

        let id_token = if record.scope.iter().any(|s| s == "openid") {
            Some(
                self.id_tokens
                    .create_id_token(&record.profile, &connection.client_id)?,
            )
        } else {
            None
        };

        info!("Exchanged authorization code for access token");
        Ok(TokenResponse {
            access_token,
            token_type: "bearer",
            expires_in: self.config.access_token_ttl,
            id_token,
        })
    }

    fn authenticate_client(
        &self,
        request: &TokenRequest,
        record: &CodeRecord,
        connection: &Connection,
    ) -> Result<()> {
        // PKCE supersedes the client secret
        if let Some(challenge) = record.code_challenge.as_deref() {
            let verifier = request
                .code_verifier
                .as_deref()
                .filter(|v| !v.is_empty())
                .ok_or_else(|| GatehouseError::unauthorized("Invalid code_verifier"))?;
            let derived = match record.code_challenge_method.as_deref() {
                Some("plain") => verifier.to_string(),
                _ => {
                    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
                    use sha2::{Digest, Sha256};
                    URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()))
                }
            };
            if derived != challenge {
                return Err(GatehouseError::unauthorized("Invalid code_verifier"));
            }
            return Ok(());
        }

        let client_id = request.client_id.as_deref().unwrap_or_default();
        if client_id.starts_with("tenant=") {
            let pairs: HashMap<_, _> = url::form_urlencoded::parse(client_id.as_bytes())
                .into_owned()
                .collect();
            let tenant_ok = pairs.get("tenant").map(String::as_str) == Some(&connection.tenant);
            let product_ok = pairs.get("product").map(String::as_str) == Some(&connection.product);
            if !tenant_ok || !product_ok {
                return Err(GatehouseError::unauthorized(
                    "Invalid client_id or client_secret",
                ));
            }
            return Ok(());
        }
        if client_id.is_empty() {
            return Err(GatehouseError::invalid_input(
                "Please specify client_secret or code_verifier",
            ));
        }
        if client_id != connection.client_id {
            return Err(GatehouseError::unauthorized(
                "Invalid client_id or client_secret",
            ));
        }
        match request.client_secret.as_deref() {
            Some(secret) if secret == connection.client_secret => Ok(()),
            Some(_) => Err(GatehouseError::unauthorized("Invalid client_secret")),
            None => Err(GatehouseError::invalid_input(
                "Please specify client_secret or code_verifier",
            )),
        }
    }

    #[instrument(skip(self, token))]
    pub async fn user_info(&self, token: &str) -> Result<Profile> {
        let record: TokenRecord = self
            .tokens
            .get(token)
            .await?
            .ok_or_else(|| GatehouseError::unauthorized("Invalid token"))?;
        Ok(record.profile)
    }
}

fn base64_encode(xml: &str) -> String {
    use base64::{engine::general_purpose::STANDARD, Engine};
    STANDARD.encode(xml)
}

fn post_form(action: &str, saml_request: &str, relay_state: &str) -> String {
    format!(
        r#"<!DOCTYPE html><html><body onload="document.forms[0].submit()"><form method="post" action="{action}"><input type="hidden" name="SAMLRequest" value="{saml_request}"/><input type="hidden" name="RelayState" value="{relay_state}"/><noscript><button type="submit">Continue</button></noscript></form></body></html>"#
    )
}
