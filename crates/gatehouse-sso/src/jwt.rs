//! ID token minting
//!
//! Issued only when the original authorize() scope asked for `openid`.
//! HS256 with explicit algorithm enforcement on both sides.

use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use gatehouse_core::{GatehouseError, Profile, Result};

const JWT_ALGORITHM: Algorithm = Algorithm::HS256;

#[derive(Debug, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub sub: String,
    /// The broker's SAML audience doubles as the token issuer
    pub iss: String,
    /// The relying application's clientID
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(rename = "firstName", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
}

#[derive(Clone)]
pub struct IdTokenService {
    secret: String,
    issuer: String,
    expiry_secs: i64,
}

impl IdTokenService {
    pub fn new(secret: String, issuer: String, expiry_secs: i64) -> Self {
        Self {
            secret,
            issuer,
            expiry_secs,
        }
    }

    #[instrument(skip(self, profile))]
    pub fn create_id_token(&self, profile: &Profile, audience: &str) -> Result<String> {
        let now = Utc::now();
        let claims = IdTokenClaims {
            sub: profile.id.clone(),
            iss: self.issuer.clone(),
            aud: audience.to_string(),
            exp: (now + Duration::seconds(self.expiry_secs)).timestamp(),
            iat: now.timestamp(),
            email: Some(profile.email.clone()).filter(|e| !e.is_empty()),
            first_name: Some(profile.first_name.clone()).filter(|n| !n.is_empty()),
            last_name: Some(profile.last_name.clone()).filter(|n| !n.is_empty()),
        };

        encode(
            &Header::new(JWT_ALGORITHM),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| GatehouseError::internal(format!("Failed to encode id_token: {e}")))
    }

    pub fn validate_id_token(&self, token: &str, audience: &str) -> Result<IdTokenClaims> {
        let mut validation = Validation::new(JWT_ALGORITHM);
        validation.set_issuer(&[&self.issuer]);
        validation.set_audience(&[audience]);

        decode::<IdTokenClaims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map(|data| data.claims)
        .map_err(|e| GatehouseError::unauthorized(format!("id_token validation failed: {e}")))
    }
}

impl std::fmt::Debug for IdTokenService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdTokenService")
            .field("issuer", &self.issuer)
            .field("expiry_secs", &self.expiry_secs)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn service() -> IdTokenService {
        IdTokenService::new(
            "a-test-secret-at-least-32-bytes-long".into(),
            "https://saml.gatehouse.test".into(),
            300,
        )
    }

    fn profile() -> Profile {
        Profile {
            id: "u1".into(),
            email: "u1@example.com".into(),
            first_name: "Uma".into(),
            last_name: "One".into(),
            requested: HashMap::new(),
            raw: serde_json::Value::Null,
        }
    }

    #[test]
    fn test_id_token_claims_roundtrip() {
        let svc = service();
        let token = svc.create_id_token(&profile(), "client-1").unwrap();
        let claims = svc.validate_id_token(&token, "client-1").unwrap();

        assert_eq!(claims.sub, "u1");
        assert_eq!(claims.aud, "client-1");
        assert_eq!(claims.iss, "https://saml.gatehouse.test");
        assert_eq!(claims.email.as_deref(), Some("u1@example.com"));
    }

    #[test]
    fn test_id_token_rejects_wrong_audience() {
        let svc = service();
        let token = svc.create_id_token(&profile(), "client-1").unwrap();
        assert!(svc.validate_id_token(&token, "client-2").is_err());
    }
}
