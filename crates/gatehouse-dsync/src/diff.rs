//! Diff and reconcile helpers
//!
//! Used by polling integrations: given stored records and a fresh provider
//! snapshot, classify each record as new, updated or deleted. Content
//! equality is a SHA-1 over the normalized (recursively key-sorted) raw
//! payload, with configurable ignore fields.

use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use std::collections::HashSet;

use gatehouse_core::{DirectoryGroup, DirectoryUser};

/// Recursively sort object keys so semantically equal payloads hash equally.
fn normalize(value: &Value, ignore_fields: &[&str]) -> Value {
    match value {
        Value::Object(map) => {
            let mut sorted: Vec<(&String, &Value)> = map
                .iter()
                .filter(|(k, _)| !ignore_fields.contains(&k.as_str()))
                .collect();
            sorted.sort_by_key(|(k, _)| k.as_str());
            let mut out = Map::new();
            for (k, v) in sorted {
                out.insert(k.clone(), normalize(v, ignore_fields));
            }
            Value::Object(out)
        }
        Value::Array(items) => {
            Value::Array(items.iter().map(|v| normalize(v, ignore_fields)).collect())
        }
        other => other.clone(),
    }
}

/// Content hash of a raw payload, ignoring the given top-level fields.
pub fn content_hash(raw: &Value, ignore_fields: &[&str]) -> String {
    let normalized = normalize(raw, ignore_fields);
    let mut hasher = Sha1::new();
    hasher.update(normalized.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn changed(existing: &Value, incoming: &Value, ignore_fields: &[&str]) -> bool {
    content_hash(existing, ignore_fields) != content_hash(incoming, ignore_fields)
}

pub fn compare_and_find_deleted_users<'a>(
    existing: &'a [DirectoryUser],
    snapshot: &[DirectoryUser],
) -> Vec<&'a DirectoryUser> {
    let ids: HashSet<&str> = snapshot.iter().map(|u| u.id.as_str()).collect();
    existing.iter().filter(|u| !ids.contains(u.id.as_str())).collect()
}

pub fn compare_and_find_new_users<'a>(
    existing: &[DirectoryUser],
    snapshot: &'a [DirectoryUser],
) -> Vec<&'a DirectoryUser> {
    let ids: HashSet<&str> = existing.iter().map(|u| u.id.as_str()).collect();
    snapshot.iter().filter(|u| !ids.contains(u.id.as_str())).collect()
}

pub fn compare_and_find_updated_users<'a>(
    existing: &[DirectoryUser],
    snapshot: &'a [DirectoryUser],
    ignore_fields: &[&str],
) -> Vec<&'a DirectoryUser> {
    snapshot
        .iter()
        .filter(|incoming| {
            existing
                .iter()
                .find(|e| e.id == incoming.id)
                .is_some_and(|e| changed(&e.raw, &incoming.raw, ignore_fields))
        })
        .collect()
}

pub fn compare_and_find_deleted_groups<'a>(
    existing: &'a [DirectoryGroup],
    snapshot: &[DirectoryGroup],
) -> Vec<&'a DirectoryGroup> {
    let ids: HashSet<&str> = snapshot.iter().map(|g| g.id.as_str()).collect();
    existing.iter().filter(|g| !ids.contains(g.id.as_str())).collect()
}

pub fn compare_and_find_new_groups<'a>(
    existing: &[DirectoryGroup],
    snapshot: &'a [DirectoryGroup],
) -> Vec<&'a DirectoryGroup> {
    let ids: HashSet<&str> = existing.iter().map(|g| g.id.as_str()).collect();
    snapshot.iter().filter(|g| !ids.contains(g.id.as_str())).collect()
}

/// Membership diff over bare member-id sets.
pub fn compare_and_find_new_members<'a>(
    existing: &[String],
    snapshot: &'a [String],
) -> Vec<&'a String> {
    let ids: HashSet<&str> = existing.iter().map(String::as_str).collect();
    snapshot.iter().filter(|m| !ids.contains(m.as_str())).collect()
}

pub fn compare_and_find_removed_members<'a>(
    existing: &'a [String],
    snapshot: &[String],
) -> Vec<&'a String> {
    let ids: HashSet<&str> = snapshot.iter().map(String::as_str).collect();
    existing.iter().filter(|m| !ids.contains(m.as_str())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn user(id: &str, raw: Value) -> DirectoryUser {
        DirectoryUser {
            id: id.to_string(),
            email: format!("{id}@example.com"),
            first_name: "A".into(),
            last_name: "B".into(),
            active: true,
            raw,
        }
    }

    #[test]
    fn test_content_hash_is_order_insensitive() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(content_hash(&a, &[]), content_hash(&b, &[]));
    }

    #[test]
    fn test_content_hash_respects_ignore_fields() {
        let a = json!({"name": "x", "meta": {"lastModified": "t1"}});
        let b = json!({"name": "x", "meta": {"lastModified": "t2"}});
        assert_ne!(content_hash(&a, &[]), content_hash(&b, &[]));
        assert_eq!(content_hash(&a, &["meta"]), content_hash(&b, &["meta"]));
    }

    #[test]
    fn test_deleted_users_with_empty_snapshot_returns_all() {
        let existing = vec![user("u1", json!({})), user("u2", json!({}))];
        let deleted = compare_and_find_deleted_users(&existing, &[]);
        assert_eq!(deleted.len(), 2);
    }

    #[test]
    fn test_new_members_with_empty_existing_returns_snapshot() {
        let snapshot = vec!["a".to_string(), "b".to_string()];
        let added = compare_and_find_new_members(&[], &snapshot);
        assert_eq!(added, vec![&"a".to_string(), &"b".to_string()]);
    }

    #[test]
    fn test_updated_users_detected_by_hash_change() {
        let existing = vec![user("u1", json!({"active": true}))];
        let snapshot = vec![
            user("u1", json!({"active": false})),
            user("u2", json!({"active": true})),
        ];
        let updated = compare_and_find_updated_users(&existing, &snapshot, &[]);
        assert_eq!(updated.len(), 1);
        assert_eq!(updated[0].id, "u1");

        let unchanged = vec![user("u1", json!({"active": true}))];
        assert!(compare_and_find_updated_users(&existing, &unchanged, &[]).is_empty());
    }

    #[test]
    fn test_removed_members() {
        let existing = vec!["a".to_string(), "b".to_string()];
        let snapshot = vec!["b".to_string()];
        let removed = compare_and_find_removed_members(&existing, &snapshot);
        assert_eq!(removed, vec![&"a".to_string()]);
    }
}
