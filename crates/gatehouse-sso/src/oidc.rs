//! Upstream OpenID Provider client
//!
//! Discovery, PKCE and code exchange against the provider configured on an
//! OIDC connection. Calls are bounded so a slow provider cannot pin a worker.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, instrument};

use gatehouse_core::{random_secret, GatehouseError, OidcProvider, Profile, Result};

const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Clone, Deserialize)]
pub struct OidcDiscovery {
    pub authorization_endpoint: String,
    pub token_endpoint: String,
    #[serde(default)]
    pub userinfo_endpoint: Option<String>,
}

/// PKCE pair generated per authorize call.
#[derive(Debug, Clone)]
pub struct PkcePair {
    pub verifier: String,
    pub challenge: String,
}

pub fn generate_pkce() -> PkcePair {
    let verifier = random_secret(32);
    let digest = Sha256::digest(verifier.as_bytes());
    PkcePair {
        challenge: URL_SAFE_NO_PAD.encode(digest),
        verifier,
    }
}

#[derive(Clone)]
pub struct UpstreamOidcClient {
    http: reqwest::Client,
}

impl Default for UpstreamOidcClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamOidcClient {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(UPSTREAM_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }

    #[instrument(skip(self))]
    pub async fn discover(&self, discovery_url: &str) -> Result<OidcDiscovery> {
        let response = self.http.get(discovery_url).send().await.map_err(|e| {
            GatehouseError::upstream(format!("OIDC discovery failed: {e}"))
        })?;
        if !response.status().is_success() {
            return Err(GatehouseError::upstream(format!(
                "OIDC discovery failed with status: {}",
                response.status()
            )));
        }
        response
            .json()
            .await
            .map_err(|e| GatehouseError::upstream(format!("Invalid discovery document: {e}")))
    }

    /// Authorization request URL for the upstream provider.
    pub fn authorization_url(
        &self,
        discovery: &OidcDiscovery,
        provider: &OidcProvider,
        redirect_uri: &str,
        state: &str,
        code_challenge: &str,
    ) -> String {
        format!(
            "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&state={}&code_challenge={}&code_challenge_method=S256",
            discovery.authorization_endpoint,
            urlencoding::encode(&provider.client_id),
            urlencoding::encode(redirect_uri),
            urlencoding::encode("openid email profile"),
            urlencoding::encode(state),
            urlencoding::encode(code_challenge),
        )
    }

    /// Redeem the upstream authorization code and normalize the claims.
    #[instrument(skip(self, provider, code, code_verifier))]
    pub async fn exchange_code(
        &self,
        discovery: &OidcDiscovery,
        provider: &OidcProvider,
        code: &str,
        code_verifier: &str,
        redirect_uri: &str,
    ) -> Result<Profile> {
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", redirect_uri),
            ("client_id", &provider.client_id),
            ("client_secret", &provider.client_secret),
            ("code_verifier", code_verifier),
        ];

        let response = self
            .http
            .post(&discovery.token_endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| GatehouseError::upstream(format!("Token exchange failed: {e}")))?;

        if !response.status().is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(GatehouseError::upstream(format!(
                "Token exchange failed: {error_text}"
            )));
        }

        let token_response: HashMap<String, serde_json::Value> = response
            .json()
            .await
            .map_err(|e| GatehouseError::upstream(format!("Invalid token response: {e}")))?;

        let id_token = token_response
            .get("id_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| GatehouseError::upstream("Missing id_token in response"))?;

        let claims = decode_id_token_claims(id_token)?;
        debug!("Exchanged upstream authorization code");
        Ok(profile_from_claims(claims))
    }
}

/// Decode the claims segment of an upstream ID token.
///
/// The token arrived over the provider's TLS token endpoint in direct
/// response to our code+verifier, which is what authenticates it here.
fn decode_id_token_claims(id_token: &str) -> Result<HashMap<String, serde_json::Value>> {
    let parts: Vec<&str> = id_token.split('.').collect();
    if parts.len() != 3 {
        return Err(GatehouseError::upstream("Invalid ID token format"));
    }
    let payload = URL_SAFE_NO_PAD
        .decode(parts[1])
        .map_err(|e| GatehouseError::upstream(format!("Failed to decode ID token: {e}")))?;
    serde_json::from_slice(&payload)
        .map_err(|e| GatehouseError::upstream(format!("Failed to parse ID token claims: {e}")))
}

fn profile_from_claims(claims: HashMap<String, serde_json::Value>) -> Profile {
    let get = |key: &str| {
        claims
            .get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    let sub = get("sub");
    let email = get("email");
    Profile {
        id: if sub.is_empty() { email.clone() } else { sub },
        email,
        first_name: get("given_name"),
        last_name: get("family_name"),
        requested: HashMap::new(),
        raw: serde_json::to_value(&claims).unwrap_or_default(),
    }
}
