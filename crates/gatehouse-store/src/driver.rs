//! Storage driver abstraction

use async_trait::async_trait;
use gatehouse_core::Result;

/// A secondary index entry attached to a record at write time.
///
/// Index values are never encrypted; they must not contain secrets.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Index {
    pub name: String,
    pub value: String,
}

impl Index {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Newest first
    #[default]
    Descending,
    Ascending,
}

/// A page of raw payloads plus the total matching count.
#[derive(Debug, Clone)]
pub struct Records {
    pub data: Vec<String>,
    pub total: usize,
}

/// Backend-agnostic namespaced KV contract.
///
/// Payloads are opaque strings. A record may carry a TTL (seconds) and any
/// number of secondary index entries; deleting a record must also remove its
/// index entries, on every driver.
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>>;

    async fn get_all(
        &self,
        namespace: &str,
        offset: usize,
        limit: usize,
        sort: SortOrder,
    ) -> Result<Records>;

    async fn get_by_index(
        &self,
        namespace: &str,
        index: &Index,
        offset: usize,
        limit: usize,
    ) -> Result<Records>;

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        ttl: Option<u64>,
        indexes: &[Index],
    ) -> Result<()>;

    async fn delete(&self, namespace: &str, key: &str) -> Result<()>;

    async fn delete_many(&self, namespace: &str, keys: &[String]) -> Result<()>;

    /// Drop expired rows. Called by the server's cleanup task; drivers whose
    /// backend expires rows natively may make this a no-op.
    async fn reap_expired(&self) -> Result<usize>;
}
