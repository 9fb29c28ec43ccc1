//! Key derivation and random-secret helpers
//!
//! Every record identity in Gatehouse is either a deterministic digest over
//! its discriminating fields (connections, directories, federation apps,
//! setup links) or a random opaque value (codes, tokens, secrets). Digest
//! keys make re-registration idempotent in identity.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Join key parts with the canonical separator.
pub fn key_from_parts(parts: &[&str]) -> String {
    parts.join(":")
}

/// SHA-256 digest of a composite key, hex-encoded.
pub fn key_digest(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cryptographically random secret, hex-encoded (`len` bytes of entropy).
pub fn random_secret(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Secondary index names shared by all stores.
///
/// Index rows are written at `put` time (write-time fan-out) and resolved by
/// `get_by_index`; these names are part of the storage layout.
pub mod index {
    /// Connections and directories by `tenant:product`
    pub const TENANT_PRODUCT: &str = "tenantProduct";
    /// Federation apps by SP entity ID
    pub const ENTITY_ID: &str = "entityID";
    /// Setup links by their one-time token
    pub const SETUP_TOKEN: &str = "token";
    /// Setup links by `tenant:product:service`
    pub const TENANT_PRODUCT_SERVICE: &str = "tenantProductService";
    /// Setup links by service
    pub const SERVICE: &str = "service";
    /// Setup links by `product:service`
    pub const PRODUCT_SERVICE: &str = "productService";
    /// Webhook event logs by directory
    pub const DIRECTORY_ID: &str = "directoryId";
    /// Directory users by SCIM userName
    pub const USER_NAME: &str = "userName";
    /// Group membership rows by group
    pub const GROUP_ID: &str = "groupId";
    /// Directory groups by displayName
    pub const DISPLAY_NAME: &str = "displayName";
}
