//! Typed, optionally encrypted view over a driver namespace

use std::sync::Arc;

use serde::{de::DeserializeOwned, Serialize};
use tracing::instrument;

use gatehouse_core::{GatehouseError, Result};

use crate::driver::{DatabaseDriver, Index, SortOrder};
use crate::encryption::EncryptionKey;

/// A namespace-scoped handle. Values are serialized to JSON and, when a key
/// is configured, sealed into an AES-256-GCM envelope before they reach the
/// driver. Index values bypass encryption so lookups remain exact-match.
#[derive(Clone)]
pub struct Store {
    driver: Arc<dyn DatabaseDriver>,
    namespace: String,
    ttl: Option<u64>,
    key: Option<EncryptionKey>,
}

/// A decoded page plus the total matching count.
#[derive(Debug)]
pub struct Page<T> {
    pub data: Vec<T>,
    pub total: usize,
}

impl Store {
    pub fn new(
        driver: Arc<dyn DatabaseDriver>,
        namespace: impl Into<String>,
        ttl: Option<u64>,
        key: Option<EncryptionKey>,
    ) -> Self {
        Self {
            driver,
            namespace: namespace.into(),
            ttl,
            key,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn seal<T: Serialize>(&self, value: &T) -> Result<String> {
        let json = serde_json::to_string(value)
            .map_err(|e| GatehouseError::storage(format!("Serialize failed: {e}")))?;
        match &self.key {
            Some(key) => key.encrypt(&json),
            None => Ok(json),
        }
    }

    fn open<T: DeserializeOwned>(&self, payload: &str) -> Result<T> {
        let json = match &self.key {
            Some(key) => key.decrypt(payload)?,
            None => payload.to_string(),
        };
        serde_json::from_str(&json)
            .map_err(|e| GatehouseError::storage(format!("Deserialize failed: {e}")))
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.driver.get(&self.namespace, key).await? {
            Some(payload) => Ok(Some(self.open(&payload)?)),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, value), fields(namespace = %self.namespace))]
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, indexes: &[Index]) -> Result<()> {
        let payload = self.seal(value)?;
        self.driver
            .put(&self.namespace, key, payload, self.ttl, indexes)
            .await
    }

    #[instrument(skip(self), fields(namespace = %self.namespace))]
    pub async fn delete(&self, key: &str) -> Result<()> {
        self.driver.delete(&self.namespace, key).await
    }

    pub async fn delete_many(&self, keys: &[String]) -> Result<()> {
        self.driver.delete_many(&self.namespace, keys).await
    }

    pub async fn get_all<T: DeserializeOwned>(
        &self,
        offset: usize,
        limit: usize,
        sort: SortOrder,
    ) -> Result<Page<T>> {
        let records = self
            .driver
            .get_all(&self.namespace, offset, limit, sort)
            .await?;
        let data = records
            .data
            .iter()
            .map(|payload| self.open(payload))
            .collect::<Result<Vec<T>>>()?;
        Ok(Page {
            data,
            total: records.total,
        })
    }

    pub async fn get_by_index<T: DeserializeOwned>(
        &self,
        index: &Index,
        offset: usize,
        limit: usize,
    ) -> Result<Page<T>> {
        let records = self
            .driver
            .get_by_index(&self.namespace, index, offset, limit)
            .await?;
        let data = records
            .data
            .iter()
            .map(|payload| self.open(payload))
            .collect::<Result<Vec<T>>>()?;
        Ok(Page {
            data,
            total: records.total,
        })
    }

    /// First record matching an index, if any.
    pub async fn find_by_index<T: DeserializeOwned>(&self, index: &Index) -> Result<Option<T>> {
        let page = self.get_by_index::<T>(index, 0, 1).await?;
        Ok(page.data.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryDriver;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Doc {
        name: String,
        secret: String,
    }

    fn doc(name: &str) -> Doc {
        Doc {
            name: name.to_string(),
            secret: "hunter2".to_string(),
        }
    }

    #[tokio::test]
    async fn test_plaintext_roundtrip() {
        let driver = Arc::new(MemoryDriver::new());
        let store = Store::new(driver, "docs", None, None);
        store.put("k1", &doc("a"), &[]).await.unwrap();
        assert_eq!(store.get::<Doc>("k1").await.unwrap(), Some(doc("a")));
    }

    #[tokio::test]
    async fn test_encrypted_payload_is_opaque_to_driver() {
        let driver = Arc::new(MemoryDriver::new());
        let key = EncryptionKey::new([3u8; 32]);
        let store = Store::new(driver.clone(), "docs", None, Some(key));

        store.put("k1", &doc("a"), &[]).await.unwrap();

        // Raw payload is the envelope, not the document
        let raw = driver.get("docs", "k1").await.unwrap().unwrap();
        assert!(!raw.contains("hunter2"));
        assert!(raw.contains("\"iv\""));
        assert!(raw.contains("\"tag\""));

        assert_eq!(store.get::<Doc>("k1").await.unwrap(), Some(doc("a")));
    }

    #[tokio::test]
    async fn test_index_lookup_with_encryption() {
        let driver = Arc::new(MemoryDriver::new());
        let key = EncryptionKey::new([3u8; 32]);
        let store = Store::new(driver, "docs", None, Some(key));
        let idx = Index::new("tenantProduct", "acme:app1");

        store.put("k1", &doc("a"), &[idx.clone()]).await.unwrap();

        let found = store.find_by_index::<Doc>(&idx).await.unwrap();
        assert_eq!(found, Some(doc("a")));
    }

    #[tokio::test]
    async fn test_store_ttl_applies() {
        let driver = Arc::new(MemoryDriver::new());
        let store = Store::new(driver, "codes", Some(0), None);
        store.put("k1", &doc("a"), &[]).await.unwrap();
        assert_eq!(store.get::<Doc>("k1").await.unwrap(), None);
    }
}
