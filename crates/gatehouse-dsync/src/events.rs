//! Webhook event dispatch
//!
//! Events are signed with the directory's webhook secret and delivered with
//! a single bounded attempt. Delivery failures are recorded in the event log
//! and never propagate into the SCIM response path.

use async_trait::async_trait;
use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

use gatehouse_core::{Directory, DirectorySyncEvent, GatehouseError, Result};

use crate::event_log::WebhookEventsLogger;

pub const SIGNATURE_HEADER: &str = "BoxyHQ-Signature";

const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

type HmacSha256 = Hmac<Sha256>;

/// `t=<unix_ms>,s=<hex_hmac_sha256>` over `timestamp.payload`.
pub fn sign_payload(secret: &str, timestamp_ms: i64, payload: &str) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| GatehouseError::internal(format!("Invalid webhook secret: {e}")))?;
    mac.update(format!("{timestamp_ms}.{payload}").as_bytes());
    let digest = hex::encode(mac.finalize().into_bytes());
    Ok(format!("t={timestamp_ms},s={digest}"))
}

/// Outbound delivery seam, injected so dispatch is testable offline.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// Returns the endpoint's HTTP status code.
    async fn deliver(&self, endpoint: &str, signature: &str, body: &str) -> Result<u16>;
}

pub struct HttpWebhookTransport {
    http: reqwest::Client,
}

impl Default for HttpWebhookTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpWebhookTransport {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(DELIVERY_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

#[async_trait]
impl WebhookTransport for HttpWebhookTransport {
    async fn deliver(&self, endpoint: &str, signature: &str, body: &str) -> Result<u16> {
        let response = self
            .http
            .post(endpoint)
            .header("Content-Type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| GatehouseError::upstream(format!("Webhook delivery failed: {e}")))?;
        Ok(response.status().as_u16())
    }
}

/// Explicitly constructed and handed to the SCIM layer; owns the transport
/// and the audit log.
#[derive(Clone)]
pub struct EventDispatcher {
    transport: Arc<dyn WebhookTransport>,
    logger: WebhookEventsLogger,
}

impl EventDispatcher {
    pub fn new(transport: Arc<dyn WebhookTransport>, logger: WebhookEventsLogger) -> Self {
        Self { transport, logger }
    }

    pub fn logger(&self) -> &WebhookEventsLogger {
        &self.logger
    }

    /// Best-effort delivery: failures are logged, not returned, so the
    /// originating SCIM request still succeeds.
    #[instrument(skip(self, directory, event), fields(directory_id = %event.directory_id, event = ?event.event))]
    pub async fn send_event(&self, directory: &Directory, event: &DirectorySyncEvent) -> Result<()> {
        let Some(webhook) = &directory.webhook else {
            return Ok(());
        };

        let payload = serde_json::to_string(event)
            .map_err(|e| GatehouseError::internal(format!("Event encode failed: {e}")))?;
        let signature = sign_payload(&webhook.secret, Utc::now().timestamp_millis(), &payload)?;

        let entry = if directory.log_webhook_events {
            Some(self.logger.log(event, &webhook.endpoint).await?)
        } else {
            None
        };

        let (status_code, delivered) = match self
            .transport
            .deliver(&webhook.endpoint, &signature, &payload)
            .await
        {
            Ok(status) => (Some(status), (200..300).contains(&status)),
            Err(e) => {
                warn!(error = %e, endpoint = %webhook.endpoint, "Webhook delivery failed");
                (None, false)
            }
        };
        if !delivered {
            warn!(?status_code, endpoint = %webhook.endpoint, "Webhook not delivered");
        }

        if let Some(entry) = entry {
            self.logger
                .update_status(&entry, &event.directory_id, status_code, delivered)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_log::NAMESPACE as LOG_NAMESPACE;
    use gatehouse_core::{
        DirectorySyncEventType, DirectoryType, ScimEndpoint, WebhookConfig,
    };
    use gatehouse_store::{MemoryDriver, Store};
    use serde_json::json;
    use std::sync::Mutex;

    struct FixedStatusTransport {
        status: u16,
        seen: Mutex<Vec<(String, String, String)>>,
    }

    #[async_trait]
    impl WebhookTransport for FixedStatusTransport {
        async fn deliver(&self, endpoint: &str, signature: &str, body: &str) -> Result<u16> {
            self.seen.lock().unwrap().push((
                endpoint.to_string(),
                signature.to_string(),
                body.to_string(),
            ));
            Ok(self.status)
        }
    }

    fn directory(log_events: bool) -> Directory {
        Directory {
            id: "dir1".into(),
            name: "acme-app1".into(),
            tenant: "acme".into(),
            product: "app1".into(),
            directory_type: DirectoryType::GenericScimV2,
            log_webhook_events: log_events,
            scim: ScimEndpoint {
                path: "/api/scim/v2.0/dir1".into(),
                secret: "scim-secret".into(),
                endpoint: None,
            },
            webhook: Some(WebhookConfig {
                endpoint: "https://app1.acme.com/events".into(),
                secret: "webhook-secret".into(),
            }),
        }
    }

    fn event() -> DirectorySyncEvent {
        DirectorySyncEvent {
            directory_id: "dir1".into(),
            event: DirectorySyncEventType::UserCreated,
            data: json!({"id": "u1"}),
            tenant: "acme".into(),
            product: "app1".into(),
        }
    }

    fn dispatcher(status: u16) -> (EventDispatcher, Arc<FixedStatusTransport>) {
        let transport = Arc::new(FixedStatusTransport {
            status,
            seen: Mutex::new(Vec::new()),
        });
        let logger = WebhookEventsLogger::new(Store::new(
            Arc::new(MemoryDriver::new()),
            LOG_NAMESPACE,
            None,
            None,
        ));
        (
            EventDispatcher::new(transport.clone(), logger),
            transport,
        )
    }

    #[test]
    fn test_signature_format_and_determinism() {
        let sig = sign_payload("secret", 1700000000000, r#"{"a":1}"#).unwrap();
        assert!(sig.starts_with("t=1700000000000,s="));
        assert_eq!(
            sig,
            sign_payload("secret", 1700000000000, r#"{"a":1}"#).unwrap()
        );
        assert_ne!(
            sig,
            sign_payload("other", 1700000000000, r#"{"a":1}"#).unwrap()
        );
    }

    #[tokio::test]
    async fn test_successful_delivery_is_logged_as_delivered() {
        let (dispatcher, transport) = dispatcher(200);
        dispatcher.send_event(&directory(true), &event()).await.unwrap();

        let seen = transport.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].0, "https://app1.acme.com/events");
        assert!(seen[0].1.starts_with("t="));
        assert!(seen[0].2.contains("\"user.created\""));

        let (entries, _) = dispatcher.logger().get_all("dir1", 0, 0).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status_code, Some(200));
        assert!(entries[0].delivered);
    }

    #[tokio::test]
    async fn test_endpoint_500_is_logged_but_not_an_error() {
        let (dispatcher, _) = dispatcher(500);
        // The caller's SCIM response path must not see a failure
        dispatcher.send_event(&directory(true), &event()).await.unwrap();

        let (entries, _) = dispatcher.logger().get_all("dir1", 0, 0).await.unwrap();
        assert_eq!(entries[0].status_code, Some(500));
        assert!(!entries[0].delivered);
    }

    #[tokio::test]
    async fn test_no_webhook_configured_is_a_noop() {
        let (dispatcher, transport) = dispatcher(200);
        let mut dir = directory(true);
        dir.webhook = None;
        dispatcher.send_event(&dir, &event()).await.unwrap();
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logging_disabled_skips_audit_log() {
        let (dispatcher, transport) = dispatcher(200);
        dispatcher.send_event(&directory(false), &event()).await.unwrap();
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
        let (entries, _) = dispatcher.logger().get_all("dir1", 0, 0).await.unwrap();
        assert!(entries.is_empty());
    }
}
