//! Directory configuration
//!
//! One SCIM directory per tenant/product/provider. Each directory carries a
//! generated SCIM path+secret pair; the secret gates every inbound SCIM
//! request and is compared in constant time.

use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{info, instrument};

use gatehouse_core::{
    index, key_digest, key_from_parts, random_secret, Directory, DirectoryType, GatehouseError,
    Result, ScimEndpoint, WebhookConfig,
};
use gatehouse_store::{Index, SortOrder, Store};

pub const NAMESPACE: &str = "dsync:config";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateDirectoryParams {
    pub tenant: String,
    pub product: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "type", default = "default_type")]
    pub directory_type: DirectoryType,
    #[serde(default)]
    pub webhook_url: Option<String>,
    #[serde(default)]
    pub webhook_secret: Option<String>,
    #[serde(default)]
    pub log_webhook_events: bool,
}

fn default_type() -> DirectoryType {
    DirectoryType::GenericScimV2
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateDirectoryParams {
    pub name: Option<String>,
    pub webhook_url: Option<String>,
    pub webhook_secret: Option<String>,
    pub log_webhook_events: Option<bool>,
}

#[derive(Clone)]
pub struct DirectoryController {
    store: Store,
    external_url: String,
}

impl DirectoryController {
    pub fn new(store: Store, external_url: String) -> Self {
        Self {
            store,
            external_url,
        }
    }

    fn tenant_product_index(tenant: &str, product: &str) -> Index {
        Index::new(
            index::TENANT_PRODUCT,
            key_digest(&key_from_parts(&[tenant, product])),
        )
    }

    #[instrument(skip(self, params), fields(tenant = %params.tenant, product = %params.product))]
    pub async fn create(&self, params: CreateDirectoryParams) -> Result<Directory> {
        if params.tenant.is_empty() {
            return Err(GatehouseError::invalid_input("Missing required parameters."));
        }
        if params.product.is_empty() {
            return Err(GatehouseError::invalid_input("Missing required parameters."));
        }

        let id = key_digest(&key_from_parts(&[&params.tenant, &params.product]));
        let path = format!("/api/scim/v2.0/{id}");
        let webhook = match params.webhook_url {
            Some(endpoint) if !endpoint.is_empty() => Some(WebhookConfig {
                endpoint,
                secret: params
                    .webhook_secret
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| random_secret(24)),
            }),
            _ => None,
        };

        let directory = Directory {
            id: id.clone(),
            name: params
                .name
                .filter(|n| !n.is_empty())
                .unwrap_or_else(|| format!("{}-{}", params.tenant, params.product)),
            tenant: params.tenant,
            product: params.product,
            directory_type: params.directory_type,
            log_webhook_events: params.log_webhook_events,
            scim: ScimEndpoint {
                endpoint: Some(format!("{}{}", self.external_url, path)),
                path,
                secret: random_secret(16),
            },
            webhook,
        };

        self.store
            .put(
                &id,
                &directory,
                &[Self::tenant_product_index(
                    &directory.tenant,
                    &directory.product,
                )],
            )
            .await?;
        info!(directory_id = %id, "Created directory");
        Ok(directory)
    }

    pub async fn get(&self, id: &str) -> Result<Directory> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| GatehouseError::not_found("Directory configuration not found."))
    }

    pub async fn get_by_tenant_and_product(
        &self,
        tenant: &str,
        product: &str,
    ) -> Result<Vec<Directory>> {
        Ok(self
            .store
            .get_by_index(&Self::tenant_product_index(tenant, product), 0, 0)
            .await?
            .data)
    }

    #[instrument(skip(self, params))]
    pub async fn update(&self, id: &str, params: UpdateDirectoryParams) -> Result<Directory> {
        let mut directory = self.get(id).await?;

        if let Some(name) = params.name.filter(|n| !n.is_empty()) {
            directory.name = name;
        }
        if let Some(endpoint) = params.webhook_url {
            directory.webhook = if endpoint.is_empty() {
                None
            } else {
                Some(WebhookConfig {
                    endpoint,
                    secret: params
                        .webhook_secret
                        .or_else(|| directory.webhook.as_ref().map(|w| w.secret.clone()))
                        .unwrap_or_else(|| random_secret(24)),
                })
            };
        }
        if let Some(log) = params.log_webhook_events {
            directory.log_webhook_events = log;
        }

        self.store
            .put(
                id,
                &directory,
                &[Self::tenant_product_index(
                    &directory.tenant,
                    &directory.product,
                )],
            )
            .await?;
        Ok(directory)
    }

    pub async fn list(&self, offset: usize, limit: usize) -> Result<Vec<Directory>> {
        Ok(self
            .store
            .get_all(offset, limit, SortOrder::Descending)
            .await?
            .data)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await?;
        info!(directory_id = %id, "Deleted directory");
        Ok(())
    }

    /// Bearer-secret gate for every inbound SCIM request.
    pub fn validate_api_secret(&self, directory: &Directory, bearer: &str) -> Result<()> {
        let matches: bool = directory
            .scim
            .secret
            .as_bytes()
            .ct_eq(bearer.as_bytes())
            .into();
        if matches {
            Ok(())
        } else {
            Err(GatehouseError::unauthorized("Unauthorized"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_store::MemoryDriver;
    use std::sync::Arc;

    fn controller() -> DirectoryController {
        DirectoryController::new(
            Store::new(Arc::new(MemoryDriver::new()), NAMESPACE, None, None),
            "https://broker.example.com".into(),
        )
    }

    fn params() -> CreateDirectoryParams {
        CreateDirectoryParams {
            tenant: "acme".into(),
            product: "app1".into(),
            name: None,
            directory_type: DirectoryType::OktaScimV2,
            webhook_url: Some("https://app1.acme.com/events".into()),
            webhook_secret: None,
            log_webhook_events: true,
        }
    }

    #[tokio::test]
    async fn test_create_generates_scim_endpoint_and_secrets() {
        let ctl = controller();
        let directory = ctl.create(params()).await.unwrap();

        assert_eq!(directory.name, "acme-app1");
        assert!(directory.scim.path.starts_with("/api/scim/v2.0/"));
        assert_eq!(
            directory.scim.endpoint.as_deref(),
            Some(format!("https://broker.example.com{}", directory.scim.path).as_str())
        );
        assert!(!directory.scim.secret.is_empty());
        let webhook = directory.webhook.unwrap();
        assert_eq!(webhook.endpoint, "https://app1.acme.com/events");
        assert!(!webhook.secret.is_empty());
    }

    #[tokio::test]
    async fn test_create_requires_tenant_and_product() {
        let ctl = controller();
        let mut bad = params();
        bad.tenant = String::new();
        let err = ctl.create(bad).await.unwrap_err();
        assert_eq!(err.to_string(), "Missing required parameters.");
    }

    #[tokio::test]
    async fn test_validate_api_secret() {
        let ctl = controller();
        let directory = ctl.create(params()).await.unwrap();

        assert!(ctl
            .validate_api_secret(&directory, &directory.scim.secret)
            .is_ok());
        let err = ctl.validate_api_secret(&directory, "wrong").unwrap_err();
        assert_eq!(err.status_code(), 401);
    }

    #[tokio::test]
    async fn test_lookup_by_tenant_and_product() {
        let ctl = controller();
        let created = ctl.create(params()).await.unwrap();
        let found = ctl
            .get_by_tenant_and_product("acme", "app1")
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, created.id);
    }

    #[tokio::test]
    async fn test_update_webhook_and_delete() {
        let ctl = controller();
        let directory = ctl.create(params()).await.unwrap();

        let updated = ctl
            .update(
                &directory.id,
                UpdateDirectoryParams {
                    webhook_url: Some(String::new()),
                    log_webhook_events: Some(false),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert!(updated.webhook.is_none());
        assert!(!updated.log_webhook_events);

        ctl.delete(&directory.id).await.unwrap();
        assert_eq!(ctl.get(&directory.id).await.unwrap_err().status_code(), 404);
    }
}
