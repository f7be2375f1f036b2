// src/keys.rs
// Identity and encryption key management backed by the host credential store

use crate::crypto::FieldKey;
use crate::db::Vault;
use crate::error::{Result, VaultError};
use std::collections::HashMap;
use std::sync::Mutex;

/// Credential store entry names.
const IDENTITY_ENTRY: &str = "identity-id";
const KEY_ENTRY: &str = "field-key";

/// Opaque get/set over the host's secure credential store.
///
/// Exactly two values live behind this trait: the installation identity
/// UUID and the base64-encoded field key. Both are binary-safe strings.
pub trait CredentialStore: Send + Sync {
    fn get(&self, name: &str) -> Result<Option<String>>;
    fn set(&self, name: &str, value: &str) -> Result<()>;
}

/// OS keychain backend (macOS Keychain, Windows Credential Manager,
/// Secret Service on Linux).
pub struct KeyringStore {
    service: String,
}

impl KeyringStore {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    fn entry(&self, name: &str) -> Result<keyring::Entry> {
        keyring::Entry::new(&self.service, name)
            .map_err(|e| VaultError::StorageUnavailable(format!("credential store: {e}")))
    }
}

impl CredentialStore for KeyringStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        match self.entry(name)?.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(VaultError::StorageUnavailable(format!(
                "credential store read failed: {e}"
            ))),
        }
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.entry(name)?.set_password(value).map_err(|e| {
            VaultError::StorageUnavailable(format!("credential store write failed: {e}"))
        })
    }
}

/// In-memory credential store for tests and ephemeral vaults.
#[derive(Default)]
pub struct MemoryStore {
    values: Mutex<HashMap<String, String>>,
}

impl CredentialStore for MemoryStore {
    fn get(&self, name: &str) -> Result<Option<String>> {
        Ok(self
            .values
            .lock()
            .expect("credential store mutex poisoned")
            .get(name)
            .cloned())
    }

    fn set(&self, name: &str, value: &str) -> Result<()> {
        self.values
            .lock()
            .expect("credential store mutex poisoned")
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

/// Single source of truth for the installation identity and the symmetric
/// field key.
///
/// The raw key never touches the filesystem; it lives in the credential
/// store and, for the life of a process, inside [`FieldKey`] handles. If
/// the credential store is inaccessible the vault refuses to open — there
/// is deliberately no weaker fallback key path.
pub struct KeyManager {
    store: Box<dyn CredentialStore>,
}

impl KeyManager {
    pub fn new(store: Box<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Manager backed by the OS credential store.
    pub fn system() -> Self {
        Self::new(Box::new(KeyringStore::new("memvault")))
    }

    /// Manager backed by process memory (tests, throwaway vaults).
    pub fn ephemeral() -> Self {
        Self::new(Box::new(MemoryStore::default()))
    }

    /// Return the installation identity, generating and persisting a new
    /// UUID on first call. Never regenerates an existing identity.
    pub fn get_or_create_identity(&self) -> Result<String> {
        if let Some(existing) = self.store.get(IDENTITY_ENTRY)? {
            return Ok(existing);
        }
        let identity = uuid::Uuid::new_v4().to_string();
        self.store.set(IDENTITY_ENTRY, &identity)?;
        tracing::info!("created new installation identity");
        Ok(identity)
    }

    /// Return the field key, generating and persisting one on first call.
    pub fn retrieve_key(&self) -> Result<FieldKey> {
        if let Some(encoded) = self.store.get(KEY_ENTRY)? {
            return FieldKey::from_base64(&encoded);
        }
        let key = FieldKey::generate();
        self.store.set(KEY_ENTRY, &key.to_base64())?;
        tracing::info!("generated new field encryption key");
        Ok(key)
    }

    /// Persist a key to the credential store (used by rotation).
    pub fn store_key(&self, key: &FieldKey) -> Result<()> {
        self.store.set(KEY_ENTRY, &key.to_base64())
    }
}

/// Rotate the field key: re-encrypt every sensitive row under a fresh key
/// in one transaction, then persist the new key.
///
/// Ordering matters: the vault commits first (rows + key fingerprint
/// atomically), then the credential store is updated. A crash between the
/// two steps leaves a fingerprint mismatch that `Vault::open` surfaces as
/// an explicit `StorageUnavailable` recovery case.
pub fn rotate_key(vault: &Vault, manager: &KeyManager) -> Result<()> {
    let new_key = FieldKey::generate();
    vault.reencrypt_all(&new_key)?;
    manager.store_key(&new_key)?;
    tracing::info!("field key rotated");
    Ok(())
}
