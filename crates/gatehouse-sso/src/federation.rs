//! SAML federation: the broker acting as an IdP
//!
//! SP registrations mirror the connection registry but are indexed by
//! entityId. The federated `/sso` endpoint parses the SP's AuthnRequest and
//! re-enters the OAuth controller's authorize machinery, so federation is the
//! broker calling itself.

use chrono::Utc;
use serde::Deserialize;
use tracing::{info, instrument};

use gatehouse_core::{
    index, key_digest, key_from_parts, FederatedApp, GatehouseError, IdpMetadata, Result,
};
use gatehouse_store::{Index, SortOrder, Store};

use crate::saml::{decode_redirect_request, parse_authn_request};

pub const NAMESPACE: &str = "samlfed:app";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CreateAppParams {
    pub tenant: String,
    pub product: String,
    pub acs_url: String,
    pub entity_id: String,
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateAppParams {
    pub id: String,
    pub acs_url: Option<String>,
    pub name: Option<String>,
}

/// What the federated SSO endpoint needs to continue as an authorize() call.
#[derive(Debug)]
pub struct FederatedAuthnRequest {
    pub app: FederatedApp,
    pub request_id: String,
}

#[derive(Clone)]
pub struct FederationController {
    store: Store,
    external_url: String,
    /// PEM body of the broker's signing certificate, served in metadata
    certificate: String,
}

impl FederationController {
    pub fn new(store: Store, external_url: String, certificate: String) -> Self {
        Self {
            store,
            external_url,
            certificate,
        }
    }

    fn entity_index(entity_id: &str) -> Index {
        Index::new(index::ENTITY_ID, key_digest(entity_id))
    }

    #[instrument(skip(self, params), fields(tenant = %params.tenant, product = %params.product))]
    pub async fn create(&self, params: CreateAppParams) -> Result<FederatedApp> {
        if params.tenant.is_empty() || params.product.is_empty() {
            return Err(GatehouseError::invalid_input(
                "Please provide tenant and product",
            ));
        }
        if params.acs_url.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide acsUrl"));
        }
        if params.entity_id.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide entityId"));
        }

        let id = key_digest(&key_from_parts(&[&params.tenant, &params.product]));
        let app = FederatedApp {
            id: id.clone(),
            tenant: params.tenant,
            product: params.product,
            acs_url: params.acs_url,
            entity_id: params.entity_id,
            name: params.name,
        };
        self.store
            .put(&id, &app, &[Self::entity_index(&app.entity_id)])
            .await?;
        info!(app_id = %id, "Registered federated app");
        Ok(app)
    }

    pub async fn get(&self, id: &str) -> Result<FederatedApp> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| GatehouseError::not_found("SAML Federation app not found"))
    }

    pub async fn get_by_entity_id(&self, entity_id: &str) -> Result<FederatedApp> {
        self.store
            .find_by_index(&Self::entity_index(entity_id))
            .await?
            .ok_or_else(|| GatehouseError::not_found("SAML Federation app not found"))
    }

    #[instrument(skip(self, params))]
    pub async fn update(&self, params: UpdateAppParams) -> Result<FederatedApp> {
        if params.id.is_empty() {
            return Err(GatehouseError::invalid_input("Please provide the app id"));
        }
        let mut app = self.get(&params.id).await?;
        if let Some(acs_url) = params.acs_url {
            app.acs_url = acs_url;
        }
        if params.name.is_some() {
            app.name = params.name;
        }
        self.store
            .put(&app.id, &app, &[Self::entity_index(&app.entity_id)])
            .await?;
        Ok(app)
    }

    pub async fn get_all(&self, offset: usize, limit: usize) -> Result<Vec<FederatedApp>> {
        Ok(self
            .store
            .get_all(offset, limit, SortOrder::Descending)
            .await?
            .data)
    }

    pub async fn delete(&self, id: &str) -> Result<()> {
        self.store.delete(id).await
    }

    /// IdP metadata XML for the SP to consume.
    pub async fn get_metadata(&self, id: &str) -> Result<IdpMetadata> {
        let app = self.get(id).await?;
        let entity_id = format!("{}/federated-saml/{}", self.external_url, app.id);
        let sso_url = format!("{}/federated-saml/sso", self.external_url);
        let instant = (Utc::now() + chrono::Duration::days(365)).format("%Y-%m-%dT%H:%M:%SZ");
        let xml = format!(
            r#"<?xml version="1.0"?>
<EntityDescriptor xmlns="urn:oasis:names:tc:SAML:2.0:metadata" entityID="{entity_id}" validUntil="{instant}">
  <IDPSSODescriptor WantAuthnRequestsSigned="false" protocolSupportEnumeration="urn:oasis:names:tc:SAML:2.0:protocol">
    <KeyDescriptor use="signing">
      <KeyInfo xmlns="http://www.w3.org/2000/09/xmldsig#">
        <X509Data><X509Certificate>{cert}</X509Certificate></X509Data>
      </KeyInfo>
    </KeyDescriptor>
    <NameIDFormat>urn:oasis:names:tc:SAML:1.1:nameid-format:emailAddress</NameIDFormat>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-Redirect" Location="{sso_url}"/>
    <SingleSignOnService Binding="urn:oasis:names:tc:SAML:2.0:bindings:HTTP-POST" Location="{sso_url}"/>
  </IDPSSODescriptor>
</EntityDescriptor>"#,
            cert = self.certificate,
        );
        Ok(IdpMetadata {
            xml,
            entity_id,
            sso_url,
            x509cert: self.certificate.clone(),
        })
    }

    /// Resolve an inbound redirect-binding `SAMLRequest` from an SP to the
    /// registered app it belongs to.
    #[instrument(skip(self, saml_request))]
    pub async fn resolve_sso_request(&self, saml_request: &str) -> Result<FederatedAuthnRequest> {
        let xml = decode_redirect_request(saml_request)?;
        let parsed = parse_authn_request(&xml)?;
        let app = self.get_by_entity_id(&parsed.issuer).await?;
        if let Some(acs) = &parsed.acs_url {
            if acs != &app.acs_url {
                return Err(GatehouseError::forbidden(
                    "ACS URL does not match the registered app",
                ));
            }
        }
        Ok(FederatedAuthnRequest {
            app,
            request_id: parsed.id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::saml::{build_authn_request, deflate_and_encode};
    use gatehouse_store::MemoryDriver;
    use std::sync::Arc;

    fn controller() -> FederationController {
        FederationController::new(
            Store::new(Arc::new(MemoryDriver::new()), NAMESPACE, None, None),
            "https://broker.example.com".into(),
            "Y2VydA==".into(),
        )
    }

    fn params() -> CreateAppParams {
        CreateAppParams {
            tenant: "acme".into(),
            product: "crm".into(),
            acs_url: "https://crm.example.com/saml/acs".into(),
            entity_id: "https://crm.example.com/saml".into(),
            name: Some("CRM".into()),
        }
    }

    #[tokio::test]
    async fn test_create_and_resolve_by_entity_id() {
        let fed = controller();
        let app = fed.create(params()).await.unwrap();
        assert_eq!(app.id, key_digest(&key_from_parts(&["acme", "crm"])));

        let found = fed
            .get_by_entity_id("https://crm.example.com/saml")
            .await
            .unwrap();
        assert_eq!(found.id, app.id);

        let err = fed.get_by_entity_id("https://unknown.example.com").await;
        assert_eq!(err.unwrap_err().status_code(), 404);
    }

    #[tokio::test]
    async fn test_metadata_contains_sso_endpoints_and_cert() {
        let fed = controller();
        let app = fed.create(params()).await.unwrap();
        let metadata = fed.get_metadata(&app.id).await.unwrap();

        assert!(metadata.xml.contains(&metadata.entity_id));
        assert!(metadata
            .xml
            .contains("https://broker.example.com/federated-saml/sso"));
        assert!(metadata.xml.contains("Y2VydA=="));
    }

    #[tokio::test]
    async fn test_resolve_sso_request_matches_registered_app() {
        let fed = controller();
        let app = fed.create(params()).await.unwrap();

        let (id, xml) = build_authn_request(
            "https://crm.example.com/saml",
            "https://crm.example.com/saml/acs",
            "https://broker.example.com/federated-saml/sso",
            false,
        );
        let resolved = fed
            .resolve_sso_request(&deflate_and_encode(&xml).unwrap())
            .await
            .unwrap();
        assert_eq!(resolved.app.id, app.id);
        assert_eq!(resolved.request_id, id);
    }

    #[tokio::test]
    async fn test_resolve_sso_request_rejects_acs_mismatch() {
        let fed = controller();
        fed.create(params()).await.unwrap();

        let (_, xml) = build_authn_request(
            "https://crm.example.com/saml",
            "https://evil.example.com/acs",
            "https://broker.example.com/federated-saml/sso",
            false,
        );
        let err = fed
            .resolve_sso_request(&deflate_and_encode(&xml).unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let fed = controller();
        let app = fed.create(params()).await.unwrap();

        let updated = fed
            .update(UpdateAppParams {
                id: app.id.clone(),
                acs_url: Some("https://crm.example.com/saml/acs2".into()),
                name: None,
            })
            .await
            .unwrap();
        assert_eq!(updated.acs_url, "https://crm.example.com/saml/acs2");

        fed.delete(&app.id).await.unwrap();
        assert_eq!(fed.get(&app.id).await.unwrap_err().status_code(), 404);
        assert!(fed
            .get_by_entity_id("https://crm.example.com/saml")
            .await
            .is_err());
    }
}
