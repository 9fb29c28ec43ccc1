//! At-rest encryption for stored payloads
//!
//! Envelope layout is `{ iv, tag, value }` with base64 fields so that an
//! encrypted row is still a valid JSON document for any backend.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as B64, Engine};
use gatehouse_core::{GatehouseError, Result};
use rand::RngCore;
use serde::{Deserialize, Serialize};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Wire shape of an encrypted payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct Encrypted {
    pub iv: String,
    pub tag: String,
    pub value: String,
}

/// AES-256-GCM key wrapper. Construct once at startup and share.
#[derive(Clone)]
pub struct EncryptionKey {
    key: [u8; 32],
}

impl EncryptionKey {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Accepts a base64-encoded 32-byte key, the form used in configuration.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = B64
            .decode(encoded)
            .map_err(|e| GatehouseError::internal(format!("Invalid encryption key: {e}")))?;
        let key: [u8; 32] = bytes
            .try_into()
            .map_err(|_| GatehouseError::internal("Encryption key must be 32 bytes"))?;
        Ok(Self { key })
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.key)
            .map_err(|e| GatehouseError::internal(format!("Cipher init failed: {e}")))
    }

    /// Encrypt a payload into its JSON envelope.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let cipher = self.cipher()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let mut ciphertext = cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| GatehouseError::internal(format!("Encryption failed: {e}")))?;

        // AEAD output is ciphertext || tag; store the tag separately
        let tag = ciphertext.split_off(ciphertext.len() - TAG_LEN);

        let envelope = Encrypted {
            iv: B64.encode(nonce_bytes),
            tag: B64.encode(tag),
            value: B64.encode(ciphertext),
        };
        serde_json::to_string(&envelope)
            .map_err(|e| GatehouseError::internal(format!("Envelope encode failed: {e}")))
    }

    /// Decrypt a JSON envelope back into the original payload.
    pub fn decrypt(&self, envelope_json: &str) -> Result<String> {
        let envelope: Encrypted = serde_json::from_str(envelope_json)
            .map_err(|e| GatehouseError::internal(format!("Envelope decode failed: {e}")))?;

        let iv = B64
            .decode(&envelope.iv)
            .map_err(|e| GatehouseError::internal(format!("Invalid iv: {e}")))?;
        let tag = B64
            .decode(&envelope.tag)
            .map_err(|e| GatehouseError::internal(format!("Invalid tag: {e}")))?;
        let mut ciphertext = B64
            .decode(&envelope.value)
            .map_err(|e| GatehouseError::internal(format!("Invalid ciphertext: {e}")))?;

        if iv.len() != NONCE_LEN || tag.len() != TAG_LEN {
            return Err(GatehouseError::internal("Invalid envelope dimensions"));
        }

        ciphertext.extend_from_slice(&tag);
        let cipher = self.cipher()?;
        let plaintext = cipher
            .decrypt(Nonce::from_slice(&iv), ciphertext.as_ref())
            .map_err(|e| GatehouseError::internal(format!("Decryption failed: {e}")))?;

        String::from_utf8(plaintext)
            .map_err(|e| GatehouseError::internal(format!("Invalid UTF-8: {e}")))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}
