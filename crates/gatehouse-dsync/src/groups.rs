//! Directory group store and membership relation
//!
//! Membership is a separate store row per (group, user) edge so incremental
//! add/remove never rewrites the group record.

use tracing::instrument;

use gatehouse_core::{
    index, key_digest, key_from_parts, DirectoryGroup, GatehouseError, GroupMembership, Result,
};
use gatehouse_store::{Index, Store};

pub const NAMESPACE: &str = "dsync:groups";
pub const MEMBERS_NAMESPACE: &str = "dsync:members";

#[derive(Clone)]
pub struct Groups {
    store: Store,
    members: Store,
}

impl Groups {
    pub fn new(store: Store, members: Store) -> Self {
        Self { store, members }
    }

    fn key(directory_id: &str, group_id: &str) -> String {
        key_from_parts(&[directory_id, group_id])
    }

    fn member_key(directory_id: &str, group_id: &str, user_id: &str) -> String {
        key_from_parts(&[directory_id, group_id, user_id])
    }

    fn group_index(directory_id: &str, group_id: &str) -> Index {
        Index::new(
            index::GROUP_ID,
            key_digest(&key_from_parts(&[directory_id, group_id])),
        )
    }

    fn indexes_for(directory_id: &str, group: &DirectoryGroup) -> Vec<Index> {
        vec![
            Index::new(index::DIRECTORY_ID, directory_id),
            Index::new(
                index::DISPLAY_NAME,
                key_digest(&key_from_parts(&[directory_id, &group.name])),
            ),
        ]
    }

    #[instrument(skip(self, group), fields(group_id = %group.id))]
    pub async fn create(&self, directory_id: &str, group: &DirectoryGroup) -> Result<()> {
        self.store
            .put(
                &Self::key(directory_id, &group.id),
                group,
                &Self::indexes_for(directory_id, group),
            )
            .await
    }

    pub async fn get(&self, directory_id: &str, group_id: &str) -> Result<Option<DirectoryGroup>> {
        self.store.get(&Self::key(directory_id, group_id)).await
    }

    pub async fn get_required(
        &self,
        directory_id: &str,
        group_id: &str,
    ) -> Result<DirectoryGroup> {
        self.get(directory_id, group_id)
            .await?
            .ok_or_else(|| GatehouseError::not_found("Group not found"))
    }

    pub async fn get_by_display_name(
        &self,
        directory_id: &str,
        display_name: &str,
    ) -> Result<Option<DirectoryGroup>> {
        self.store
            .find_by_index(&Index::new(
                index::DISPLAY_NAME,
                key_digest(&key_from_parts(&[directory_id, display_name])),
            ))
            .await
    }

    pub async fn update(&self, directory_id: &str, group: &DirectoryGroup) -> Result<()> {
        self.create(directory_id, group).await
    }

    pub async fn delete(&self, directory_id: &str, group_id: &str) -> Result<()> {
        self.remove_all_members(directory_id, group_id).await?;
        self.store.delete(&Self::key(directory_id, group_id)).await
    }

    pub async fn get_all(
        &self,
        directory_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<DirectoryGroup>, usize)> {
        let page = self
            .store
            .get_by_index(
                &Index::new(index::DIRECTORY_ID, directory_id),
                offset,
                limit,
            )
            .await?;
        Ok((page.data, page.total))
    }

    // --- membership relation ---

    pub async fn add_member(
        &self,
        directory_id: &str,
        group_id: &str,
        user_id: &str,
    ) -> Result<()> {
        self.members
            .put(
                &Self::member_key(directory_id, group_id, user_id),
                &GroupMembership {
                    group_id: group_id.to_string(),
                    user_id: user_id.to_string(),
                },
                &[Self::group_index(directory_id, group_id)],
            )
            .await
    }

    pub async fn remove_member(
        &self,
        directory_id: &str,
        group_id: &str,
        user_id: &str,
    ) -> Result<()> {
        self.members
            .delete(&Self::member_key(directory_id, group_id, user_id))
            .await
    }

    pub async fn is_member(
        &self,
        directory_id: &str,
        group_id: &str,
        user_id: &str,
    ) -> Result<bool> {
        Ok(self
            .members
            .get::<GroupMembership>(&Self::member_key(directory_id, group_id, user_id))
            .await?
            .is_some())
    }

    pub async fn get_members(
        &self,
        directory_id: &str,
        group_id: &str,
    ) -> Result<Vec<GroupMembership>> {
        Ok(self
            .members
            .get_by_index(&Self::group_index(directory_id, group_id), 0, 0)
            .await?
            .data)
    }

    #[instrument(skip(self))]
    pub async fn remove_all_members(&self, directory_id: &str, group_id: &str) -> Result<()> {
        let members = self.get_members(directory_id, group_id).await?;
        let keys: Vec<String> = members
            .iter()
            .map(|m| Self::member_key(directory_id, group_id, &m.user_id))
            .collect();
        self.members.delete_many(&keys).await
    }

    /// Remove every group (and its membership rows) in a directory.
    pub async fn delete_all(&self, directory_id: &str) -> Result<()> {
        let (groups, _) = self.get_all(directory_id, 0, 0).await?;
        for group in &groups {
            self.delete(directory_id, &group.id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_store::MemoryDriver;
    use serde_json::json;
    use std::sync::Arc;

    fn groups() -> Groups {
        let driver = Arc::new(MemoryDriver::new());
        Groups::new(
            Store::new(driver.clone(), NAMESPACE, None, None),
            Store::new(driver, MEMBERS_NAMESPACE, None, None),
        )
    }

    fn group(id: &str, name: &str) -> DirectoryGroup {
        DirectoryGroup {
            id: id.to_string(),
            name: name.to_string(),
            raw: json!({"displayName": name}),
        }
    }

    #[tokio::test]
    async fn test_create_and_display_name_lookup() {
        let groups = groups();
        groups.create("dir1", &group("g1", "Engineering")).await.unwrap();

        let found = groups
            .get_by_display_name("dir1", "Engineering")
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "g1");
    }

    #[tokio::test]
    async fn test_membership_add_remove() {
        let groups = groups();
        groups.create("dir1", &group("g1", "Eng")).await.unwrap();

        groups.add_member("dir1", "g1", "u1").await.unwrap();
        groups.add_member("dir1", "g1", "u2").await.unwrap();
        assert!(groups.is_member("dir1", "g1", "u1").await.unwrap());

        let members = groups.get_members("dir1", "g1").await.unwrap();
        assert_eq!(members.len(), 2);

        groups.remove_member("dir1", "g1", "u1").await.unwrap();
        assert!(!groups.is_member("dir1", "g1", "u1").await.unwrap());
        assert_eq!(groups.get_members("dir1", "g1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_group_clears_membership() {
        let groups = groups();
        groups.create("dir1", &group("g1", "Eng")).await.unwrap();
        groups.add_member("dir1", "g1", "u1").await.unwrap();

        groups.delete("dir1", "g1").await.unwrap();
        assert!(groups.get("dir1", "g1").await.unwrap().is_none());
        assert!(groups.get_members("dir1", "g1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_membership_is_per_group() {
        let groups = groups();
        groups.add_member("dir1", "g1", "u1").await.unwrap();
        groups.add_member("dir1", "g2", "u1").await.unwrap();

        groups.remove_member("dir1", "g1", "u1").await.unwrap();
        assert!(groups.is_member("dir1", "g2", "u1").await.unwrap());
    }
}
