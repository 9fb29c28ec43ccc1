//! Connection registry
//!
//! CRUD over SAML/OIDC connection records. Identity is a digest over the
//! discriminating fields, so re-registering the same tenant/product/IdP is
//! idempotent in identity; the clientSecret survives re-registration.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use serde::Deserialize;
use std::time::Duration;
use tracing::{info, instrument};

use gatehouse_core::{
    index, key_digest, key_from_parts, random_secret, Connection, ConnectionKind, GatehouseError,
    OidcProvider, Result, Strategy,
};
use gatehouse_store::{Index, SortOrder, Store};

use crate::saml::parse_idp_metadata;

pub const NAMESPACE: &str = "sso:connection";

const MAX_REDIRECT_URLS: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 100;
const METADATA_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

const MISSING_SELECTOR: &str = "Please provide `clientID` or `tenant` and `product`.";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateSamlConnectionParams {
    pub tenant: String,
    pub product: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub default_redirect_url: String,
    pub redirect_url: Vec<String>,
    pub raw_metadata: Option<String>,
    pub encoded_raw_metadata: Option<String>,
    pub metadata_url: Option<String>,
    pub force_authn: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateOidcConnectionParams {
    pub tenant: String,
    pub product: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub default_redirect_url: String,
    pub redirect_url: Vec<String>,
    pub oidc_discovery_url: String,
    pub oidc_client_id: String,
    pub oidc_client_secret: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateConnectionParams {
    #[serde(rename = "clientID")]
    pub client_id: String,
    #[serde(rename = "clientSecret")]
    pub client_secret: String,
    pub tenant: String,
    pub product: String,
    pub name: Option<String>,
    pub description: Option<String>,
    pub default_redirect_url: Option<String>,
    pub redirect_url: Option<Vec<String>>,
    pub force_authn: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GetConnectionsParams {
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    pub tenant: Option<String>,
    pub product: Option<String>,
    pub strategy: Option<Strategy>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteConnectionsParams {
    #[serde(rename = "clientID")]
    pub client_id: Option<String>,
    #[serde(rename = "clientSecret")]
    pub client_secret: Option<String>,
    pub tenant: Option<String>,
    pub product: Option<String>,
}

#[derive(Clone)]
pub struct ConnectionRegistry {
    store: Store,
    http: reqwest::Client,
}

impl ConnectionRegistry {
    pub fn new(store: Store) -> Self {
        let http = reqwest::Client::builder()
            .timeout(METADATA_FETCH_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { store, http }
    }

    fn validate_common(
        tenant: &str,
        product: &str,
        default_redirect_url: &str,
        redirect_url: &[String],
        description: Option<&str>,
    ) -> Result<()> {
        if tenant.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide tenant"));
        }
        if product.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide product"));
        }
        if default_redirect_url.is_empty() {
            return Err(GatehouseError::invalid_input(
                "Please provide a defaultRedirectUrl",
            ));
        }
        if redirect_url.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide redirectUrl"));
        }
        if redirect_url.len() > MAX_REDIRECT_URLS {
            return Err(GatehouseError::invalid_input(
                "Exceeded maximum number of allowed redirect urls",
            ));
        }
        for candidate in redirect_url.iter().map(String::as_str).chain([default_redirect_url]) {
            url::Url::parse(candidate)
                .map_err(|_| GatehouseError::invalid_input("Invalid redirect url"))?;
        }
        if description.map(str::len).unwrap_or(0) > MAX_DESCRIPTION_LEN {
            return Err(GatehouseError::invalid_input(
                "Description should not exceed 100 characters",
            ));
        }
        Ok(())
    }

    async fn resolve_metadata_xml(&self, params: &CreateSamlConnectionParams) -> Result<String> {
        if let Some(raw) = &params.raw_metadata {
            return Ok(raw.clone());
        }
        if let Some(encoded) = &params.encoded_raw_metadata {
            let bytes = B64.decode(encoded).map_err(|e| {
                GatehouseError::invalid_input(format!("Invalid encodedRawMetadata: {e}"))
            })?;
            return String::from_utf8(bytes).map_err(|e| {
                GatehouseError::invalid_input(format!("Invalid encodedRawMetadata: {e}"))
            });
        }
        if let Some(metadata_url) = &params.metadata_url {
            let parsed = url::Url::parse(metadata_url)
                .map_err(|_| GatehouseError::invalid_input("Invalid metadataUrl"))?;
            let loopback = matches!(parsed.host_str(), Some("localhost" | "127.0.0.1"));
            if parsed.scheme() != "https" && !loopback {
                return Err(GatehouseError::invalid_input(
                    "Metadata URL not valid, allowed ones are localhost/HTTPS URLs",
                ));
            }
            let response = self.http.get(parsed).send().await.map_err(|e| {
                GatehouseError::upstream(format!("Failed to fetch metadata: {e}"))
            })?;
            return response.text().await.map_err(|e| {
                GatehouseError::upstream(format!("Failed to fetch metadata: {e}"))
            });
        }
        Err(GatehouseError::invalid_input(
            "Please provide rawMetadata or encodedRawMetadata or metadataUrl",
        ))
    }

    fn indexes_for(connection: &Connection) -> Vec<Index> {
        let mut indexes = vec![Index::new(
            index::TENANT_PRODUCT,
            key_digest(&key_from_parts(&[&connection.tenant, &connection.product])),
        )];
        if let Some(meta) = connection.saml_metadata() {
            indexes.push(Index::new(index::ENTITY_ID, key_digest(&meta.entity_id)));
        }
        indexes
    }

    async fn save(&self, connection: &Connection) -> Result<()> {
        self.store
            .put(&connection.client_id, connection, &Self::indexes_for(connection))
            .await
    }

    #[instrument(skip(self, params), fields(tenant = %params.tenant, product = %params.product))]
    pub async fn create_saml_connection(
        &self,
        params: CreateSamlConnectionParams,
    ) -> Result<Connection> {
        Self::validate_common(
            &params.tenant,
            &params.product,
            &params.default_redirect_url,
            &params.redirect_url,
            params.description.as_deref(),
        )?;

        let xml = self.resolve_metadata_xml(&params).await?;
        let metadata = parse_idp_metadata(&xml)?;

        let client_id = key_digest(&key_from_parts(&[
            &params.tenant,
            &params.product,
            &metadata.entity_id,
        ]));

        // Re-registration keeps the original secret so issued credentials stay valid
        let client_secret = match self.store.get::<Connection>(&client_id).await? {
            Some(existing) => existing.client_secret,
            None => random_secret(24),
        };

        let connection = Connection {
            client_id,
            client_secret,
            tenant: params.tenant,
            product: params.product,
            name: params.name,
            description: params.description,
            default_redirect_url: params.default_redirect_url,
            redirect_url: params.redirect_url,
            force_authn: params.force_authn,
            kind: ConnectionKind::Saml(metadata),
        };
        self.save(&connection).await?;
        info!(client_id = %connection.client_id, "Created SAML connection");
        Ok(connection)
    }

    #[instrument(skip(self, params), fields(tenant = %params.tenant, product = %params.product))]
    pub async fn create_oidc_connection(
        &self,
        params: CreateOidcConnectionParams,
    ) -> Result<Connection> {
        Self::validate_common(
            &params.tenant,
            &params.product,
            &params.default_redirect_url,
            &params.redirect_url,
            params.description.as_deref(),
        )?;
        if params.oidc_discovery_url.is_empty() {
            return Err(GatehouseError::invalid_input(
                "Please provide the discoveryUrl for the OpenID Provider",
            ));
        }
        if params.oidc_client_id.is_empty() {
            return Err(GatehouseError::invalid_input(
                "Please provide the clientId from OpenID Provider",
            ));
        }
        if params.oidc_client_secret.is_empty() {
            return Err(GatehouseError::invalid_input(
                "Please provide the clientSecret from OpenID Provider",
            ));
        }

        let client_id = key_digest(&key_from_parts(&[
            &params.tenant,
            &params.product,
            &params.oidc_client_id,
        ]));
        let client_secret = match self.store.get::<Connection>(&client_id).await? {
            Some(existing) => existing.client_secret,
            None => random_secret(24),
        };

        let connection = Connection {
            client_id,
            client_secret,
            tenant: params.tenant,
            product: params.product,
            name: params.name,
            description: params.description,
            default_redirect_url: params.default_redirect_url,
            redirect_url: params.redirect_url,
            force_authn: false,
            kind: ConnectionKind::Oidc(OidcProvider {
                discovery_url: params.oidc_discovery_url,
                client_id: params.oidc_client_id,
                client_secret: params.oidc_client_secret,
            }),
        };
        self.save(&connection).await?;
        info!(client_id = %connection.client_id, "Created OIDC connection");
        Ok(connection)
    }

    /// Shared guard for both update paths.
    async fn authorize_update(&self, params: &UpdateConnectionParams) -> Result<Connection> {
        if params.client_id.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide clientID"));
        }
        if params.client_secret.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide clientSecret"));
        }
        let existing = self
            .store
            .get::<Connection>(&params.client_id)
            .await?
            .ok_or_else(|| GatehouseError::not_found("Connection not found"))?;
        if existing.client_secret != params.client_secret {
            return Err(GatehouseError::invalid_input("clientSecret mismatch"));
        }
        if existing.tenant != params.tenant || existing.product != params.product {
            let what = match existing.strategy() {
                Strategy::Saml => "Tenant/Product config mismatch with IdP metadata",
                Strategy::Oidc => "Tenant/Product config mismatch with OIDC Provider metadata",
            };
            return Err(GatehouseError::invalid_input(what));
        }
        Ok(existing)
    }

    #[instrument(skip(self, params))]
    pub async fn update_connection(&self, params: UpdateConnectionParams) -> Result<Connection> {
        let mut connection = self.authorize_update(&params).await?;

        if let Some(redirect_url) = params.redirect_url {
            let default = params
                .default_redirect_url
                .clone()
                .unwrap_or_else(|| connection.default_redirect_url.clone());
            Self::validate_common(
                &connection.tenant,
                &connection.product,
                &default,
                &redirect_url,
                params.description.as_deref(),
            )?;
            connection.redirect_url = redirect_url;
        }
        if let Some(default_redirect_url) = params.default_redirect_url {
            url::Url::parse(&default_redirect_url)
                .map_err(|_| GatehouseError::invalid_input("Invalid redirect url"))?;
            connection.default_redirect_url = default_redirect_url;
        }
        if params.name.is_some() {
            connection.name = params.name;
        }
        if let Some(description) = params.description {
            if description.len() > MAX_DESCRIPTION_LEN {
                return Err(GatehouseError::invalid_input(
                    "Description should not exceed 100 characters",
                ));
            }
            connection.description = Some(description);
        }
        if let Some(force_authn) = params.force_authn {
            connection.force_authn = force_authn;
        }

        self.save(&connection).await?;
        Ok(connection)
    }

    pub async fn get_by_client_id(&self, client_id: &str) -> Result<Option<Connection>> {
        self.store.get(client_id).await
    }

    pub async fn get_by_tenant_product(
        &self,
        tenant: &str,
        product: &str,
    ) -> Result<Vec<Connection>> {
        let idx = Index::new(
            index::TENANT_PRODUCT,
            key_digest(&key_from_parts(&[tenant, product])),
        );
        Ok(self.store.get_by_index(&idx, 0, 0).await?.data)
    }

    #[instrument(skip(self, params))]
    pub async fn get_connections(&self, params: GetConnectionsParams) -> Result<Vec<Connection>> {
        if let Some(client_id) = params.client_id.filter(|id| !id.is_empty()) {
            return Ok(self
                .store
                .get::<Connection>(&client_id)
                .await?
                .into_iter()
                .collect());
        }
        match (params.tenant.as_deref(), params.product.as_deref()) {
            (Some(tenant), Some(product)) if !tenant.is_empty() && !product.is_empty() => {
                let mut connections = self.get_by_tenant_product(tenant, product).await?;
                if let Some(strategy) = params.strategy {
                    connections.retain(|c| c.strategy() == strategy);
                }
                Ok(connections)
            }
            _ => Err(GatehouseError::invalid_input(MISSING_SELECTOR)),
        }
    }

    #[instrument(skip(self, params))]
    pub async fn delete_connections(&self, params: DeleteConnectionsParams) -> Result<()> {
        if let Some(client_id) = params.client_id.filter(|id| !id.is_empty()) {
            let client_secret = params
                .client_secret
                .filter(|s| !s.is_empty())
                .ok_or_else(|| GatehouseError::invalid_input("Please provide clientSecret"))?;
            if let Some(connection) = self.store.get::<Connection>(&client_id).await? {
                if connection.client_secret != client_secret {
                    return Err(GatehouseError::invalid_input("clientSecret mismatch"));
                }
                self.store.delete(&client_id).await?;
                info!(%client_id, "Deleted connection");
            }
            return Ok(());
        }
        match (params.tenant.as_deref(), params.product.as_deref()) {
            (Some(tenant), Some(product)) if !tenant.is_empty() && !product.is_empty() => {
                // Bulk sweep; connections are independently keyed so partial
                // failure leaves a consistent partial deletion
                for connection in self.get_by_tenant_product(tenant, product).await? {
                    self.store.delete(&connection.client_id).await?;
                }
                Ok(())
            }
            _ => Err(GatehouseError::invalid_input(MISSING_SELECTOR)),
        }
    }

    /// All connections, newest first, for the admin listing surface.
    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Connection>> {
        Ok(self
            .store
            .get_all(offset, limit, SortOrder::Descending)
            .await?
            .data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_store::MemoryDriver;
    use std::sync::Arc;

    const METADATA: &str = r#"<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="https://idp.example.com/saml">
  <IDPSSODescriptor>
    <KeyDescriptor use="signing"><KeyInfo><X509Data><X509Certificate>aGVsbG8gY2VydA==</X509Certificate></X509Data></KeyInfo></KeyDescriptor>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="https://idp.example.com/sso"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#;

    fn registry() -> ConnectionRegistry {
        let store = Store::new(Arc::new(MemoryDriver::new()), NAMESPACE, None, None);
        ConnectionRegistry::new(store)
    }

    fn saml_params() -> CreateSamlConnectionParams {
        CreateSamlConnectionParams {
            tenant: "acme".into(),
            product: "app1".into(),
            default_redirect_url: "https://app1.acme.com/callback".into(),
            redirect_url: vec!["https://app1.acme.com/callback".into()],
            raw_metadata: Some(METADATA.into()),
            ..Default::default()
        }
    }

    fn oidc_params() -> CreateOidcConnectionParams {
        CreateOidcConnectionParams {
            tenant: "acme".into(),
            product: "app1".into(),
            default_redirect_url: "https://app1.acme.com/callback".into(),
            redirect_url: vec!["https://app1.acme.com/callback".into()],
            oidc_discovery_url: "https://op.example.com/.well-known/openid-configuration".into(),
            oidc_client_id: "op-client".into(),
            oidc_client_secret: "op-secret".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_create_saml_connection_identity_is_idempotent() {
        let registry = registry();
        let first = registry.create_saml_connection(saml_params()).await.unwrap();
        let second = registry.create_saml_connection(saml_params()).await.unwrap();

        assert_eq!(first.client_id, second.client_id);
        assert_eq!(first.client_secret, second.client_secret);
        assert_eq!(first.strategy(), Strategy::Saml);
    }

    #[tokio::test]
    async fn test_create_requires_metadata_source() {
        let registry = registry();
        let mut params = saml_params();
        params.raw_metadata = None;
        let err = registry.create_saml_connection(params).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Please provide rawMetadata or encodedRawMetadata or metadataUrl"
        );
    }

    #[tokio::test]
    async fn test_create_validates_required_fields() {
        let registry = registry();

        let mut params = saml_params();
        params.tenant = String::new();
        let err = registry.create_saml_connection(params).await.unwrap_err();
        assert_eq!(err.to_string(), "Please provide tenant");

        let mut params = saml_params();
        params.default_redirect_url = String::new();
        let err = registry.create_saml_connection(params).await.unwrap_err();
        assert_eq!(err.to_string(), "Please provide a defaultRedirectUrl");

        let mut params = saml_params();
        params.redirect_url = vec!["https://ok.example.com".into(); 101];
        let err = registry.create_saml_connection(params).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Exceeded maximum number of allowed redirect urls"
        );

        let mut params = saml_params();
        params.description = Some("x".repeat(101));
        let err = registry.create_saml_connection(params).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn test_oidc_create_requires_provider_fields() {
        let registry = registry();
        let mut params = oidc_params();
        params.oidc_client_id = String::new();
        let err = registry.create_oidc_connection(params).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Please provide the clientId from OpenID Provider"
        );
    }

    #[tokio::test]
    async fn test_get_connections_resolution_order() {
        let registry = registry();
        let created = registry.create_oidc_connection(oidc_params()).await.unwrap();

        let by_client_id = registry
            .get_connections(GetConnectionsParams {
                client_id: Some(created.client_id.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_client_id.len(), 1);

        let by_tenant = registry
            .get_connections(GetConnectionsParams {
                tenant: Some("acme".into()),
                product: Some("app1".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_tenant.len(), 1);

        let filtered_out = registry
            .get_connections(GetConnectionsParams {
                tenant: Some("acme".into()),
                product: Some("app1".into()),
                strategy: Some(Strategy::Saml),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(filtered_out.is_empty());

        let err = registry
            .get_connections(GetConnectionsParams::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), MISSING_SELECTOR);
    }

    #[tokio::test]
    async fn test_update_requires_matching_secret() {
        let registry = registry();
        let created = registry.create_oidc_connection(oidc_params()).await.unwrap();

        let err = registry
            .update_connection(UpdateConnectionParams {
                client_id: created.client_id.clone(),
                client_secret: "wrong".into(),
                tenant: "acme".into(),
                product: "app1".into(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "clientSecret mismatch");

        let updated = registry
            .update_connection(UpdateConnectionParams {
                client_id: created.client_id.clone(),
                client_secret: created.client_secret.clone(),
                tenant: "acme".into(),
                product: "app1".into(),
                name: Some("Production".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(updated.name.as_deref(), Some("Production"));
    }

    #[tokio::test]
    async fn test_delete_by_tenant_product_sweeps_index() {
        let registry = registry();
        registry.create_oidc_connection(oidc_params()).await.unwrap();
        registry.create_saml_connection(saml_params()).await.unwrap();

        registry
            .delete_connections(DeleteConnectionsParams {
                tenant: Some("acme".into()),
                product: Some("app1".into()),
                ..Default::default()
            })
            .await
            .unwrap();

        let remaining = registry.get_by_tenant_product("acme", "app1").await.unwrap();
        assert!(remaining.is_empty());
    }

    #[tokio::test]
    async fn test_delete_by_client_id_checks_secret() {
        let registry = registry();
        let created = registry.create_oidc_connection(oidc_params()).await.unwrap();

        let err = registry
            .delete_connections(DeleteConnectionsParams {
                client_id: Some(created.client_id.clone()),
                client_secret: Some("wrong".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "clientSecret mismatch");

        registry
            .delete_connections(DeleteConnectionsParams {
                client_id: Some(created.client_id.clone()),
                client_secret: Some(created.client_secret.clone()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(registry
            .get_by_client_id(&created.client_id)
            .await
            .unwrap()
            .is_none());
    }
}
