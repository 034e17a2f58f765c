//! Per-user directory credential encryption
//!
//! AES-256-GCM with HKDF-SHA256 per-user key derivation. Stored secrets are
//! laid out as `nonce || ciphertext || tag`.

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use hkdf::Hkdf;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;

use crate::error::{QueryError, QueryResult};
use crate::ids::UserId;

/// Length of AES-256 key in bytes.
const KEY_LENGTH: usize = 32;

/// Length of GCM nonce in bytes.
const NONCE_LENGTH: usize = 12;

/// Length of GCM authentication tag in bytes.
const TAG_LENGTH: usize = 16;

/// Context string for HKDF key derivation.
const HKDF_INFO: &[u8] = b"xavyo-directory-query-credentials-v1";

/// Encrypts and decrypts stored per-user directory secrets.
#[derive(Clone)]
pub struct CredentialEncryption {
    master_key: [u8; KEY_LENGTH],
}

impl std::fmt::Debug for CredentialEncryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialEncryption")
            .field("master_key", &"[REDACTED]")
            .finish()
    }
}

impl CredentialEncryption {
    #[must_use]
    pub fn new(master_key: [u8; KEY_LENGTH]) -> Self {
        Self { master_key }
    }

    /// Create from a hex-encoded 32-byte master key.
    pub fn from_hex(hex_key: &str) -> QueryResult<Self> {
        let bytes = hex::decode(hex_key.trim())
            .map_err(|e| QueryError::configuration(format!("invalid hex encryption key: {e}")))?;

        let key: [u8; KEY_LENGTH] = bytes.as_slice().try_into().map_err(|_| {
            QueryError::configuration(format!(
                "encryption key must be {} bytes, got {}",
                KEY_LENGTH,
                bytes.len()
            ))
        })?;
        Ok(Self::new(key))
    }

    fn derive_user_key(&self, user_id: UserId) -> QueryResult<[u8; KEY_LENGTH]> {
        let salt = user_id.as_i64().to_be_bytes();
        let hkdf = Hkdf::<Sha256>::new(Some(&salt), &self.master_key);
        let mut derived = [0u8; KEY_LENGTH];
        hkdf.expand(HKDF_INFO, &mut derived)
            .map_err(|e| QueryError::credential(format!("key derivation failed: {e}")))?;
        Ok(derived)
    }

    fn cipher(&self, user_id: UserId) -> QueryResult<Aes256Gcm> {
        let key = self.derive_user_key(user_id)?;
        Aes256Gcm::new_from_slice(&key)
            .map_err(|e| QueryError::credential(format!("failed to create cipher: {e}")))
    }

    /// Encrypt `plaintext` for `user_id`.
    pub fn encrypt(&self, user_id: UserId, plaintext: &[u8]) -> QueryResult<Vec<u8>> {
        let cipher = self.cipher(user_id)?;

        let mut nonce_bytes = [0u8; NONCE_LENGTH];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| QueryError::credential(format!("encryption failed: {e}")))?;

        let mut out = Vec::with_capacity(NONCE_LENGTH + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt data produced by [`encrypt`](Self::encrypt) for the same user.
    pub fn decrypt(&self, user_id: UserId, data: &[u8]) -> QueryResult<Vec<u8>> {
        if data.len() < NONCE_LENGTH + TAG_LENGTH {
            return Err(QueryError::credential("ciphertext too short"));
        }

        let cipher = self.cipher(user_id)?;
        let (nonce_bytes, encrypted) = data.split_at(NONCE_LENGTH);

        cipher
            .decrypt(Nonce::from_slice(nonce_bytes), encrypted)
            .map_err(|e| QueryError::credential(format!("decryption failed: {e}")))
    }

    pub fn encrypt_string(&self, user_id: UserId, plaintext: &str) -> QueryResult<Vec<u8>> {
        self.encrypt(user_id, plaintext.as_bytes())
    }

    pub fn decrypt_string(&self, user_id: UserId, data: &[u8]) -> QueryResult<String> {
        let plaintext = self.decrypt(user_id, data)?;
        String::from_utf8(plaintext)
            .map_err(|e| QueryError::credential(format!("decrypted secret is not valid UTF-8: {e}")))
    }
}
