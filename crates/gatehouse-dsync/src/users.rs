//! Directory user store
//!
//! Users are keyed per directory and indexed by directory id (listing,
//! bulk clear) and by userName (SCIM `userName eq` filters).

use tracing::instrument;

use gatehouse_core::{
    index, key_digest, key_from_parts, DirectoryUser, GatehouseError, Result,
};
use gatehouse_store::{Index, Store};

pub const NAMESPACE: &str = "dsync:users";

#[derive(Clone)]
pub struct Users {
    store: Store,
}

impl Users {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    fn key(directory_id: &str, user_id: &str) -> String {
        key_from_parts(&[directory_id, user_id])
    }

    fn user_name_of(user: &DirectoryUser) -> String {
        user.raw
            .get("userName")
            .and_then(|v| v.as_str())
            .unwrap_or(&user.email)
            .to_string()
    }

    fn indexes_for(directory_id: &str, user: &DirectoryUser) -> Vec<Index> {
        vec![
            Index::new(index::DIRECTORY_ID, directory_id),
            Index::new(
                index::USER_NAME,
                key_digest(&key_from_parts(&[directory_id, &Self::user_name_of(user)])),
            ),
        ]
    }

    #[instrument(skip(self, user), fields(user_id = %user.id))]
    pub async fn create(&self, directory_id: &str, user: &DirectoryUser) -> Result<()> {
        self.store
            .put(
                &Self::key(directory_id, &user.id),
                user,
                &Self::indexes_for(directory_id, user),
            )
            .await
    }

    pub async fn get(&self, directory_id: &str, user_id: &str) -> Result<Option<DirectoryUser>> {
        self.store.get(&Self::key(directory_id, user_id)).await
    }

    pub async fn get_required(&self, directory_id: &str, user_id: &str) -> Result<DirectoryUser> {
        self.get(directory_id, user_id)
            .await?
            .ok_or_else(|| GatehouseError::not_found("User not found"))
    }

    pub async fn get_by_user_name(
        &self,
        directory_id: &str,
        user_name: &str,
    ) -> Result<Option<DirectoryUser>> {
        self.store
            .find_by_index(&Index::new(
                index::USER_NAME,
                key_digest(&key_from_parts(&[directory_id, user_name])),
            ))
            .await
    }

    /// Overwrite; index rows follow the new userName.
    pub async fn update(&self, directory_id: &str, user: &DirectoryUser) -> Result<()> {
        self.create(directory_id, user).await
    }

    pub async fn delete(&self, directory_id: &str, user_id: &str) -> Result<()> {
        self.store.delete(&Self::key(directory_id, user_id)).await
    }

    pub async fn get_all(
        &self,
        directory_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<DirectoryUser>, usize)> {
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

    /// Remove every user belonging to a directory.
    #[instrument(skip(self))]
    pub async fn delete_all(&self, directory_id: &str) -> Result<()> {
        let (users, _) = self.get_all(directory_id, 0, 0).await?;
        let keys: Vec<String> = users
            .iter()
            .map(|u| Self::key(directory_id, &u.id))
            .collect();
        self.store.delete_many(&keys).await
    }
}
