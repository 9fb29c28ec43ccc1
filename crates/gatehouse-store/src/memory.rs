//! In-memory storage driver
//!
//! The default driver for single-process deployments and tests. Expired rows
//! are filtered at read time and physically removed by `reap_expired`.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use tracing::debug;

use gatehouse_core::Result;

use crate::driver::{DatabaseDriver, Index, Records, SortOrder};

#[derive(Debug, Clone)]
struct Row {
    value: String,
    /// Insertion sequence, preserved across overwrites
    seq: u64,
    expires_at: Option<i64>,
    /// Back-references so delete can clean up index entries
    indexes: Vec<Index>,
}

impl Row {
    fn is_expired(&self, now_ms: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now_ms)
    }
}

#[derive(Default)]
struct Inner {
    rows: HashMap<String, HashMap<String, Row>>,
    /// (namespace, index name, index value) -> keys, insertion ordered
    index_rows: HashMap<(String, String, String), Vec<String>>,
    next_seq: u64,
}

impl Inner {
    fn unlink_indexes(&mut self, namespace: &str, key: &str, indexes: &[Index]) {
        for idx in indexes {
            let slot = (
                namespace.to_string(),
                idx.name.clone(),
                idx.value.clone(),
            );
            if let Some(keys) = self.index_rows.get_mut(&slot) {
                keys.retain(|k| k != key);
                if keys.is_empty() {
                    self.index_rows.remove(&slot);
                }
            }
        }
    }

    fn remove_row(&mut self, namespace: &str, key: &str) -> Option<Row> {
        let row = self.rows.get_mut(namespace)?.remove(key)?;
        let indexes = row.indexes.clone();
        self.unlink_indexes(namespace, key, &indexes);
        Some(row)
    }
}

#[derive(Default)]
pub struct MemoryDriver {
    inner: RwLock<Inner>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }
}

fn paginate(mut rows: Vec<(u64, String)>, offset: usize, limit: usize, sort: SortOrder) -> Records {
    match sort {
        SortOrder::Descending => rows.sort_by(|a, b| b.0.cmp(&a.0)),
        SortOrder::Ascending => rows.sort_by_key(|r| r.0),
    }
    let total = rows.len();
    let data: Vec<String> = rows
        .into_iter()
        .skip(offset)
        .take(if limit == 0 { usize::MAX } else { limit })
        .map(|(_, v)| v)
        .collect();
    Records { data, total }
}

#[async_trait]
impl DatabaseDriver for MemoryDriver {
    async fn get(&self, namespace: &str, key: &str) -> Result<Option<String>> {
        let inner = self.inner.read().await;
        let now = Utc::now().timestamp_millis();
        Ok(inner
            .rows
            .get(namespace)
            .and_then(|ns| ns.get(key))
            .filter(|row| !row.is_expired(now))
            .map(|row| row.value.clone()))
    }

    async fn get_all(
        &self,
        namespace: &str,
        offset: usize,
        limit: usize,
        sort: SortOrder,
    ) -> Result<Records> {
        let inner = self.inner.read().await;
        let now = Utc::now().timestamp_millis();
        let rows = inner
            .rows
            .get(namespace)
            .map(|ns| {
                ns.values()
                    .filter(|row| !row.is_expired(now))
                    .map(|row| (row.seq, row.value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(paginate(rows, offset, limit, sort))
    }

    async fn get_by_index(
        &self,
        namespace: &str,
        index: &Index,
        offset: usize,
        limit: usize,
    ) -> Result<Records> {
        let inner = self.inner.read().await;
        let now = Utc::now().timestamp_millis();
        let slot = (
            namespace.to_string(),
            index.name.clone(),
            index.value.clone(),
        );
        let rows = inner
            .index_rows
            .get(&slot)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| inner.rows.get(namespace).and_then(|ns| ns.get(key)))
                    .filter(|row| !row.is_expired(now))
                    .map(|row| (row.seq, row.value.clone()))
                    .collect()
            })
            .unwrap_or_default();
        Ok(paginate(rows, offset, limit, SortOrder::Descending))
    }

    async fn put(
        &self,
        namespace: &str,
        key: &str,
        value: String,
        ttl: Option<u64>,
        indexes: &[Index],
    ) -> Result<()> {
        let mut inner = self.inner.write().await;
        let now = Utc::now().timestamp_millis();

        // Overwrites keep the original insertion order but replace indexes
        let prior_seq = inner.remove_row(namespace, key).map(|row| row.seq);
        let seq = prior_seq.unwrap_or_else(|| {
            inner.next_seq += 1;
            inner.next_seq
        });

        let expires_at = ttl.map(|secs| now + (secs as i64) * 1000);
        inner.rows.entry(namespace.to_string()).or_default().insert(
            key.to_string(),
            Row {
                value,
                seq,
                expires_at,
                indexes: indexes.to_vec(),
            },
        );
        for idx in indexes {
            inner
                .index_rows
                .entry((
                    namespace.to_string(),
                    idx.name.clone(),
                    idx.value.clone(),
                ))
                .or_default()
                .push(key.to_string());
        }
        Ok(())
    }

    async fn delete(&self, namespace: &str, key: &str) -> Result<()> {
        let mut inner = self.inner.write().await;
        inner.remove_row(namespace, key);
        Ok(())
    }

    async fn delete_many(&self, namespace: &str, keys: &[String]) -> Result<()> {
        let mut inner = self.inner.write().await;
        for key in keys {
            inner.remove_row(namespace, key);
        }
        Ok(())
    }

    async fn reap_expired(&self) -> Result<usize> {
        let mut inner = self.inner.write().await;
        let now = Utc::now().timestamp_millis();

        let expired: Vec<(String, String)> = inner
            .rows
            .iter()
            .flat_map(|(ns, rows)| {
                rows.iter()
                    .filter(|(_, row)| row.is_expired(now))
                    .map(|(key, _)| (ns.clone(), key.clone()))
            })
            .collect();

        for (ns, key) in &expired {
            inner.remove_row(ns, key);
        }
        if !expired.is_empty() {
            debug!(count = expired.len(), "Reaped expired rows");
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn idx(name: &str, value: &str) -> Index {
        Index::new(name, value)
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let db = MemoryDriver::new();
        db.put("conn", "k1", "v1".into(), None, &[]).await.unwrap();
        assert_eq!(db.get("conn", "k1").await.unwrap(), Some("v1".into()));
        assert_eq!(db.get("conn", "missing").await.unwrap(), None);
        assert_eq!(db.get("other", "k1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_namespaces_are_isolated() {
        let db = MemoryDriver::new();
        db.put("a", "k", "va".into(), None, &[]).await.unwrap();
        db.put("b", "k", "vb".into(), None, &[]).await.unwrap();
        assert_eq!(db.get("a", "k").await.unwrap(), Some("va".into()));
        assert_eq!(db.get("b", "k").await.unwrap(), Some("vb".into()));
    }

    #[tokio::test]
    async fn test_get_by_index() {
        let db = MemoryDriver::new();
        let tp = idx("tenantProduct", "acme:app1");
        db.put("conn", "k1", "v1".into(), None, &[tp.clone()])
            .await
            .unwrap();
        db.put("conn", "k2", "v2".into(), None, &[tp.clone()])
            .await
            .unwrap();
        db.put("conn", "k3", "v3".into(), None, &[idx("tenantProduct", "acme:app2")])
            .await
            .unwrap();

        let records = db.get_by_index("conn", &tp, 0, 0).await.unwrap();
        assert_eq!(records.total, 2);
        // Newest first
        assert_eq!(records.data, vec!["v2".to_string(), "v1".to_string()]);
    }

    #[tokio::test]
    async fn test_overwrite_replaces_indexes() {
        let db = MemoryDriver::new();
        let old = idx("entityID", "https://old.example.com");
        let new = idx("entityID", "https://new.example.com");
        db.put("conn", "k1", "v1".into(), None, &[old.clone()])
            .await
            .unwrap();
        db.put("conn", "k1", "v2".into(), None, &[new.clone()])
            .await
            .unwrap();

        assert_eq!(db.get_by_index("conn", &old, 0, 0).await.unwrap().total, 0);
        let records = db.get_by_index("conn", &new, 0, 0).await.unwrap();
        assert_eq!(records.data, vec!["v2".to_string()]);
    }

    #[tokio::test]
    async fn test_delete_removes_index_entries() {
        let db = MemoryDriver::new();
        let tp = idx("tenantProduct", "acme:app1");
        db.put("conn", "k1", "v1".into(), None, &[tp.clone()])
            .await
            .unwrap();
        db.delete("conn", "k1").await.unwrap();

        assert_eq!(db.get("conn", "k1").await.unwrap(), None);
        assert_eq!(db.get_by_index("conn", &tp, 0, 0).await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_expired_rows_are_invisible_then_reaped() {
        let db = MemoryDriver::new();
        let tok = idx("token", "t1");
        db.put("setup", "k1", "v1".into(), Some(0), &[tok.clone()])
            .await
            .unwrap();

        assert_eq!(db.get("setup", "k1").await.unwrap(), None);
        assert_eq!(db.get_by_index("setup", &tok, 0, 0).await.unwrap().total, 0);

        let reaped = db.reap_expired().await.unwrap();
        assert_eq!(reaped, 1);
        assert_eq!(db.reap_expired().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ttl_in_the_future_is_readable() {
        let db = MemoryDriver::new();
        db.put("code", "k1", "v1".into(), Some(300), &[])
            .await
            .unwrap();
        assert_eq!(db.get("code", "k1").await.unwrap(), Some("v1".into()));
    }

    #[tokio::test]
    async fn test_get_all_pagination() {
        let db = MemoryDriver::new();
        for i in 0..5 {
            db.put("conn", &format!("k{i}"), format!("v{i}"), None, &[])
                .await
                .unwrap();
        }

        let page = db
            .get_all("conn", 0, 2, SortOrder::Descending)
            .await
            .unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.data, vec!["v4".to_string(), "v3".to_string()]);

        let page = db
            .get_all("conn", 4, 2, SortOrder::Descending)
            .await
            .unwrap();
        assert_eq!(page.data, vec!["v0".to_string()]);

        let all = db.get_all("conn", 0, 0, SortOrder::Ascending).await.unwrap();
        assert_eq!(all.data.first(), Some(&"v0".to_string()));
    }

    #[tokio::test]
    async fn test_delete_many() {
        let db = MemoryDriver::new();
        db.put("u", "k1", "v1".into(), None, &[]).await.unwrap();
        db.put("u", "k2", "v2".into(), None, &[]).await.unwrap();
        db.put("u", "k3", "v3".into(), None, &[]).await.unwrap();
        db.delete_many("u", &["k1".into(), "k3".into()]).await.unwrap();

        let all = db.get_all("u", 0, 0, SortOrder::Descending).await.unwrap();
        assert_eq!(all.data, vec!["v2".to_string()]);
    }
}
