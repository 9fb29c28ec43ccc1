//! Setup links
//!
//! Time-boxed tokenized URLs that let a tenant admin configure SSO or
//! directory sync without broker-admin credentials. One live link per
//! (tenant, product, service) unless regenerated.

use chrono::{Duration, Utc};
use serde::Deserialize;
use tracing::{info, instrument};

use gatehouse_core::{
    index, key_digest, key_from_parts, random_secret, GatehouseError, Result, SetupLink,
    SetupLinkService,
};
use gatehouse_store::{Index, Store};

pub const NAMESPACE: &str = "setup:link";

const VALIDITY_DAYS: i64 = 3;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateSetupLinkParams {
    pub tenant: String,
    pub product: String,
    pub service: SetupLinkService,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub default_redirect_url: Option<String>,
    #[serde(default)]
    pub redirect_url: Option<Vec<String>>,
    #[serde(default)]
    pub regenerate: bool,
}

/// Listing filter; tiered, most specific combination wins.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterByParams {
    pub tenant: Option<String>,
    pub product: Option<String>,
    pub service: Option<SetupLinkService>,
}

#[derive(Clone)]
pub struct SetupLinkController {
    store: Store,
    external_url: String,
}

impl SetupLinkController {
    pub fn new(store: Store, external_url: String) -> Self {
        Self {
            store,
            external_url,
        }
    }

    fn indexes_for(link: &SetupLink, token: &str) -> Vec<Index> {
        let service = link.service.to_string();
        vec![
            Index::new(index::SETUP_TOKEN, token),
            Index::new(
                index::TENANT_PRODUCT_SERVICE,
                key_digest(&key_from_parts(&[&link.tenant, &link.product, &service])),
            ),
            Index::new(index::SERVICE, service.clone()),
            Index::new(
                index::PRODUCT_SERVICE,
                key_digest(&key_from_parts(&[&link.product, &service])),
            ),
        ]
    }

    #[instrument(skip(self, params), fields(tenant = %params.tenant, product = %params.product))]
    pub async fn create(&self, params: CreateSetupLinkParams) -> Result<SetupLink> {
        if params.tenant.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide tenant"));
        }
        if params.product.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide product"));
        }

        let setup_id = key_digest(&key_from_parts(&[
            &params.tenant,
            &params.product,
            &params.service.to_string(),
        ]));

        if let Some(existing) = self.store.get::<SetupLink>(&setup_id).await? {
            if !existing.is_expired() && !params.regenerate {
                return Ok(existing);
            }
            // Regeneration (or expiry) invalidates the prior token
            self.store.delete(&setup_id).await?;
        }

        let token = random_secret(24);
        let link = SetupLink {
            setup_id: setup_id.clone(),
            tenant: params.tenant,
            product: params.product,
            service: params.service,
            name: params.name,
            description: params.description,
            default_redirect_url: params.default_redirect_url,
            redirect_url: params.redirect_url,
            valid_till: (Utc::now() + Duration::days(VALIDITY_DAYS)).timestamp_millis(),
            url: format!("{}/setup/{}", self.external_url, token),
        };
        self.store
            .put(&setup_id, &link, &Self::indexes_for(&link, &token))
            .await?;
        info!(%setup_id, service = %link.service, "Created setup link");
        Ok(link)
    }

    pub async fn get_by_token(&self, token: &str) -> Result<SetupLink> {
        let link: SetupLink = self
            .store
            .find_by_index(&Index::new(index::SETUP_TOKEN, token))
            .await?
            .ok_or_else(|| GatehouseError::not_found("Setup link is not found"))?;
        if link.is_expired() {
            return Err(GatehouseError::unauthorized("Setup link is expired"));
        }
        Ok(link)
    }

    pub async fn get(&self, setup_id: &str) -> Result<SetupLink> {
        self.store
            .get(setup_id)
            .await?
            .ok_or_else(|| GatehouseError::not_found("Setup link is not found"))
    }

    /// Tiered lookup: tenant+product+service > product+service > service.
    #[instrument(skip(self, params))]
    pub async fn filter_by(&self, params: FilterByParams) -> Result<Vec<SetupLink>> {
        let service = params.service.map(|s| s.to_string());
        let idx = match (params.tenant.as_deref(), params.product.as_deref(), service) {
            (Some(tenant), Some(product), Some(service)) => Index::new(
                index::TENANT_PRODUCT_SERVICE,
                key_digest(&key_from_parts(&[tenant, product, &service])),
            ),
            (None, Some(product), Some(service)) => Index::new(
                index::PRODUCT_SERVICE,
                key_digest(&key_from_parts(&[product, &service])),
            ),
            (None, None, Some(service)) => Index::new(index::SERVICE, service),
            _ => {
                return Err(GatehouseError::invalid_input(
                    "Please provide either service or product along with service",
                ))
            }
        };
        Ok(self.store.get_by_index(&idx, 0, 0).await?.data)
    }

    pub async fn remove(&self, setup_id: &str) -> Result<()> {
        self.store.delete(setup_id).await
    }
}
