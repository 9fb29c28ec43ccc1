//! Namespaced key-value storage for Gatehouse
//!
//! Everything the broker persists goes through [`Store`], a thin typed layer
//! over a [`DatabaseDriver`]. Drivers see opaque payload strings only; when an
//! encryption key is configured the payloads are AES-256-GCM envelopes and
//! index values stay plaintext so lookups keep working.

pub mod driver;
pub mod encryption;
pub mod memory;
pub mod store;

pub use driver::{DatabaseDriver, Index, Records, SortOrder};
pub use encryption::EncryptionKey;
pub use memory::MemoryDriver;
pub use store::Store;
