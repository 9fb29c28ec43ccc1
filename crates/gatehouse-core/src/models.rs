//! Domain models for the Gatehouse federation broker
//!
//! Field names (and their serde renames) are the wire contract: records are
//! persisted and served exactly in these shapes, so renaming a field is a
//! breaking change for stored data and API consumers alike.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Connections
// =============================================================================

/// A registered IdP binding for a tenant/product pair.
///
/// `kind` is the SAML/OIDC discriminant: exactly one of `idpMetadata` or
/// `oidcProvider` appears on the wire, never both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    pub tenant: String,
    pub product: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "defaultRedirectUrl")]
    pub default_redirect_url: String,
    #[serde(rename = "redirectUrl")]
    pub redirect_url: Vec<String>,
    #[serde(rename = "forceAuthn", default, skip_serializing_if = "is_false")]
    pub force_authn: bool,
    #[serde(flatten)]
    pub kind: ConnectionKind,
}

fn is_false(v: &bool) -> bool {
    !v
}

/// SAML vs OIDC, as a tagged union rather than a pair of optional fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ConnectionKind {
    #[serde(rename = "idpMetadata")]
    Saml(SamlMetadata),
    #[serde(rename = "oidcProvider")]
    Oidc(OidcProvider),
}

impl Connection {
    /// The single place structural SAML-vs-OIDC checks live.
    pub fn strategy(&self) -> Strategy {
        match self.kind {
            ConnectionKind::Saml(_) => Strategy::Saml,
            ConnectionKind::Oidc(_) => Strategy::Oidc,
        }
    }

    pub fn saml_metadata(&self) -> Option<&SamlMetadata> {
        match &self.kind {
            ConnectionKind::Saml(m) => Some(m),
            ConnectionKind::Oidc(_) => None,
        }
    }

    pub fn oidc_provider(&self) -> Option<&OidcProvider> {
        match &self.kind {
            ConnectionKind::Oidc(p) => Some(p),
            ConnectionKind::Saml(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    Saml,
    Oidc,
}

impl std::str::FromStr for Strategy {
    type Err = crate::GatehouseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "saml" => Ok(Strategy::Saml),
            "oidc" => Ok(Strategy::Oidc),
            other => Err(crate::GatehouseError::invalid_input(format!(
                "Strategy: {other} not supported"
            ))),
        }
    }
}

/// Parsed SAML IdP metadata stored on a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SamlMetadata {
    pub sso: SsoEndpoints,
    #[serde(rename = "entityID")]
    pub entity_id: String,
    /// SHA-1 thumbprint of the IdP signing certificate
    pub thumbprint: String,
    #[serde(rename = "loginType")]
    pub login_type: LoginType,
    /// Hostname of the IdP, for display
    pub provider: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsoEndpoints {
    #[serde(rename = "postUrl", skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
    #[serde(rename = "redirectUrl", skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    Idp,
    Sp,
}

/// Upstream OpenID Provider configuration stored on a connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OidcProvider {
    #[serde(rename = "discoveryUrl")]
    pub discovery_url: String,
    #[serde(rename = "clientId")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
}

// =============================================================================
// Profiles
// =============================================================================

/// Normalized identity claims resolved from a SAML assertion or OIDC token,
/// plus an echo of the original authorize() parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Profile {
    pub id: String,
    pub email: String,
    #[serde(rename = "firstName")]
    pub first_name: String,
    #[serde(rename = "lastName")]
    pub last_name: String,
    #[serde(default)]
    pub requested: HashMap<String, String>,
    /// Raw attributes as received from the IdP
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw: serde_json::Value,
}

// =============================================================================
// Setup links
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SetupLinkService {
    Sso,
    Dsync,
}

impl fmt::Display for SetupLinkService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetupLinkService::Sso => write!(f, "sso"),
            SetupLinkService::Dsync => write!(f, "dsync"),
        }
    }
}

/// Time-boxed, tokenized self-service onboarding link.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetupLink {
    #[serde(rename = "setupID")]
    pub setup_id: String,
    pub tenant: String,
    pub product: String,
    pub service: SetupLinkService,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "defaultRedirectUrl", skip_serializing_if = "Option::is_none")]
    pub default_redirect_url: Option<String>,
    #[serde(rename = "redirectUrl", skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<Vec<String>>,
    /// Expiry as a unix-millisecond timestamp
    #[serde(rename = "validTill")]
    pub valid_till: i64,
    pub url: String,
}

impl SetupLink {
    pub fn is_expired(&self) -> bool {
        self.valid_till < Utc::now().timestamp_millis()
    }
}

// =============================================================================
// Directory sync
// =============================================================================

/// Supported SCIM directory providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectoryType {
    #[serde(rename = "azure-scim-v2")]
    AzureScimV2,
    #[serde(rename = "onelogin-scim-v2")]
    OneLoginScimV2,
    #[serde(rename = "okta-scim-v2")]
    OktaScimV2,
    #[serde(rename = "jumpcloud-scim-v2")]
    JumpCloudScimV2,
    #[serde(rename = "generic-scim-v2")]
    GenericScimV2,
}

impl DirectoryType {
    pub fn display_name(&self) -> &'static str {
        match self {
            DirectoryType::AzureScimV2 => "Azure SCIM v2.0",
            DirectoryType::OneLoginScimV2 => "OneLogin SCIM v2.0",
            DirectoryType::OktaScimV2 => "Okta SCIM v2.0",
            DirectoryType::JumpCloudScimV2 => "JumpCloud v2.0",
            DirectoryType::GenericScimV2 => "Generic SCIM v2.0",
        }
    }

    pub fn all() -> &'static [DirectoryType] {
        &[
            DirectoryType::AzureScimV2,
            DirectoryType::OneLoginScimV2,
            DirectoryType::OktaScimV2,
            DirectoryType::JumpCloudScimV2,
            DirectoryType::GenericScimV2,
        ]
    }
}

/// One SCIM directory configuration per tenant/product/provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Directory {
    pub id: String,
    pub name: String,
    pub tenant: String,
    pub product: String,
    #[serde(rename = "type")]
    pub directory_type: DirectoryType,
    #[serde(default)]
    pub log_webhook_events: bool,
    pub scim: ScimEndpoint,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub webhook: Option<WebhookConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScimEndpoint {
    pub path: String,
    /// Bearer secret required on every inbound SCIM request
    pub secret: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    pub endpoint: String,
    pub secret: String,
}

/// A SCIM-provisioned user, tenant/product scoped.
///
/// `raw` preserves the provider's full SCIM payload for round-trip fidelity;
/// identity equality for diffing is a normalized hash over `raw`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub active: bool,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// A SCIM-provisioned group. Membership lives in a separate relation store,
/// not embedded here, so incremental member changes avoid rewriting the group.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryGroup {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub raw: serde_json::Value,
}

/// Membership relation row: one per (group, user) edge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupMembership {
    pub group_id: String,
    pub user_id: String,
}

// =============================================================================
// Directory sync events
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectorySyncEventType {
    #[serde(rename = "user.created")]
    UserCreated,
    #[serde(rename = "user.updated")]
    UserUpdated,
    #[serde(rename = "user.deleted")]
    UserDeleted,
    #[serde(rename = "group.created")]
    GroupCreated,
    #[serde(rename = "group.updated")]
    GroupUpdated,
    #[serde(rename = "group.deleted")]
    GroupDeleted,
    #[serde(rename = "group.user_added")]
    GroupUserAdded,
    #[serde(rename = "group.user_removed")]
    GroupUserRemoved,
}

/// Event published to a directory's webhook endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectorySyncEvent {
    pub directory_id: String,
    pub event: DirectorySyncEventType,
    pub data: serde_json::Value,
    pub tenant: String,
    pub product: String,
}

/// Audit record of a webhook delivery attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventLog {
    pub id: String,
    pub payload: serde_json::Value,
    pub webhook_endpoint: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub delivered: bool,
}

// =============================================================================
// SAML federation
// =============================================================================

/// A registration making the broker act as an IdP for a downstream SP.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FederatedApp {
    pub id: String,
    pub tenant: String,
    pub product: String,
    #[serde(rename = "acsUrl")]
    pub acs_url: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// IdP metadata produced for a federated app's SP to consume.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdpMetadata {
    pub xml: String,
    #[serde(rename = "entityId")]
    pub entity_id: String,
    #[serde(rename = "ssoUrl")]
    pub sso_url: String,
    pub x509cert: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn saml_connection() -> Connection {
        Connection {
            client_id: "abc".to_string(),
            client_secret: "secret".to_string(),
            tenant: "acme".to_string(),
            product: "app1".to_string(),
            name: None,
            description: None,
            default_redirect_url: "https://app1.acme.com/callback".to_string(),
            redirect_url: vec!["https://app1.acme.com/callback".to_string()],
            force_authn: false,
            kind: ConnectionKind::Saml(SamlMetadata {
                sso: SsoEndpoints {
                    post_url: Some("https://idp.example.com/sso/post".to_string()),
                    redirect_url: Some("https://idp.example.com/sso/redirect".to_string()),
                },
                entity_id: "https://idp.example.com".to_string(),
                thumbprint: "aa:bb".to_string(),
                login_type: LoginType::Sp,
                provider: "idp.example.com".to_string(),
            }),
        }
    }

    #[test]
    fn test_connection_wire_shape_is_tagged_union() {
        let conn = saml_connection();
        let json = serde_json::to_value(&conn).unwrap();

        assert!(json.get("idpMetadata").is_some());
        assert!(json.get("oidcProvider").is_none());
        assert_eq!(json["clientID"], "abc");
        assert_eq!(json["defaultRedirectUrl"], "https://app1.acme.com/callback");
    }

    #[test]
    fn test_connection_roundtrip() {
        let conn = saml_connection();
        let json = serde_json::to_string(&conn).unwrap();
        let back: Connection = serde_json::from_str(&json).unwrap();

        assert_eq!(back.strategy(), Strategy::Saml);
        assert_eq!(
            back.saml_metadata().unwrap().entity_id,
            "https://idp.example.com"
        );
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("saml".parse::<Strategy>().unwrap(), Strategy::Saml);
        assert_eq!("oidc".parse::<Strategy>().unwrap(), Strategy::Oidc);
        assert!("ldap".parse::<Strategy>().is_err());
    }

    #[test]
    fn test_setup_link_expiry() {
        let mut link = SetupLink {
            setup_id: "id".to_string(),
            tenant: "acme".to_string(),
            product: "app1".to_string(),
            service: SetupLinkService::Sso,
            name: None,
            description: None,
            default_redirect_url: None,
            redirect_url: None,
            valid_till: Utc::now().timestamp_millis() + 60_000,
            url: "http://localhost/setup/tok".to_string(),
        };
        assert!(!link.is_expired());

        link.valid_till = Utc::now().timestamp_millis() - 1;
        assert!(link.is_expired());
    }

    #[test]
    fn test_event_type_wire_names() {
        let json = serde_json::to_string(&DirectorySyncEventType::UserDeleted).unwrap();
        assert_eq!(json, "\"user.deleted\"");
        let json = serde_json::to_string(&DirectorySyncEventType::GroupUserAdded).unwrap();
        assert_eq!(json, "\"group.user_added\"");
    }

    #[test]
    fn test_directory_type_wire_names() {
        let json = serde_json::to_string(&DirectoryType::AzureScimV2).unwrap();
        assert_eq!(json, "\"azure-scim-v2\"");
    }
}
