// src/crypto.rs
// Symmetric field encryption and stable hashing primitives

use crate::error::{Result, VaultError};
use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;
use sha2::{Digest, Sha256};

/// AES-256 key length in bytes.
pub const KEY_LEN: usize = 32;

/// AES-GCM nonce length (96 bits).
const NONCE_LEN: usize = 12;

/// Symmetric key for field encryption.
///
/// Deliberately opaque: no `Display`, and `Debug` redacts the bytes so the
/// key can never end up in logs or error messages.
#[derive(Clone)]
pub struct FieldKey([u8; KEY_LEN]);

impl std::fmt::Debug for FieldKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FieldKey(..)")
    }
}

impl FieldKey {
    /// Generate a fresh random key.
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self(key.into())
    }

    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a key previously stored with [`FieldKey::to_base64`].
    ///
    /// A malformed value from the credential store means the installation
    /// cannot be opened, so this maps to `StorageUnavailable` rather than
    /// a decryption error.
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = B64
            .decode(encoded)
            .map_err(|_| VaultError::StorageUnavailable("stored key is not valid base64".into()))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            VaultError::StorageUnavailable("stored key has the wrong length".into())
        })?;
        Ok(Self(bytes))
    }

    pub fn to_base64(&self) -> String {
        B64.encode(self.0)
    }

    /// Non-secret fingerprint of the key, recorded in vault Meta so a
    /// key/vault mismatch is detected at open time.
    pub fn fingerprint(&self) -> String {
        stable_hash(self.0)
    }
}

/// Encrypt a single field value. Each call draws a fresh random IV, so
/// identical plaintexts produce different blobs.
///
/// Blob format: `base64(iv):base64(ciphertext)`.
pub fn encrypt_field(plaintext: &str, key: &FieldKey) -> Result<String> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext.as_bytes())
        .map_err(|_| VaultError::Other("field encryption failed".into()))?;
    Ok(format!("{}:{}", B64.encode(nonce), B64.encode(ciphertext)))
}

/// Decrypt a field blob produced by [`encrypt_field`].
///
/// Fails with `Decryption` when the blob is malformed or the key does not
/// match. Callers must propagate the error — substituting an empty string
/// here would silently turn key problems into data loss.
pub fn decrypt_field(blob: &str, key: &FieldKey) -> Result<String> {
    let (iv_b64, ct_b64) = blob
        .split_once(':')
        .ok_or_else(|| VaultError::Decryption("malformed blob (missing separator)".into()))?;

    let iv = B64
        .decode(iv_b64)
        .map_err(|_| VaultError::Decryption("malformed blob (bad iv encoding)".into()))?;
    if iv.len() != NONCE_LEN {
        return Err(VaultError::Decryption("malformed blob (bad iv length)".into()));
    }
    let ciphertext = B64
        .decode(ct_b64)
        .map_err(|_| VaultError::Decryption("malformed blob (bad ciphertext encoding)".into()))?;

    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&key.0));
    let plaintext = cipher
        .decrypt(Nonce::from_slice(&iv), ciphertext.as_slice())
        .map_err(|_| VaultError::Decryption("key mismatch or corrupt ciphertext".into()))?;

    String::from_utf8(plaintext)
        .map_err(|_| VaultError::Decryption("decrypted field is not UTF-8".into()))
}

/// Deterministic SHA-256 digest as lowercase hex.
///
/// Used for cache keys, bundle hashes, and key fingerprints — never for
/// secrecy.
pub fn stable_hash(value: impl AsRef<[u8]>) -> String {
    format!("{:x}", Sha256::digest(value.as_ref()))
}
