// src/db/mod.rs
// Vault storage engine: embedded SQLite with transparent field encryption

mod facts;
mod messages;
mod meta;
mod prefs;
mod schema;
mod types;

pub use facts::{PRIORITY_CAP, PRIORITY_STEP};
pub use meta::{
    META_IDENTITY_ID, META_INTEGRITY_CHECK, META_INTEGRITY_CHECKED_AT, META_KEY_FINGERPRINT,
    META_MIGRATION_COMPLETE, META_MIGRATION_COMPLETED_AT, META_SCHEMA_VERSION,
    META_SELECTOR_VERSION, META_VAULT_CREATED_AT,
};
pub use schema::SCHEMA_VERSION;
pub use types::*;

use crate::crypto::{self, FieldKey};
use crate::error::{Result, VaultError};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, RwLock};

/// Vault handle: one SQLite connection guarded by a mutex.
///
/// Single-writer, multi-reader within one process; every logical operation
/// runs inside a single transaction on the guarded connection, so no
/// further application-level locking exists. The handle is passed
/// explicitly to collaborators — there is no ambient global instance.
#[derive(Debug)]
pub struct Vault {
    conn: Mutex<Connection>,
    key: RwLock<FieldKey>,
    path: Option<PathBuf>,
}

impl Vault {
    /// Open (or create) the vault at `path` with the given field key.
    ///
    /// Runs the integrity check, schema migrations, and the key
    /// fingerprint check. A fingerprint mismatch means the credential
    /// store and the vault have diverged — that is a fatal, user-visible
    /// condition, never a silent re-key.
    pub fn open(path: &Path, key: FieldKey) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path).map_err(|e| {
            VaultError::StorageUnavailable(format!("cannot open vault database: {e}"))
        })?;

        // WAL for durability with bounded write latency; busy_timeout so a
        // stalled writer cannot hang the process indefinitely.
        conn.execute_batch(
            "PRAGMA journal_mode=WAL; \
             PRAGMA foreign_keys=ON; \
             PRAGMA busy_timeout=5000; \
             PRAGMA synchronous=NORMAL;",
        )?;

        let vault = Self {
            conn: Mutex::new(conn),
            key: RwLock::new(key),
            path: Some(path.to_path_buf()),
        };
        vault.init()?;
        Ok(vault)
    }

    /// Open an in-memory vault (for testing).
    pub fn open_in_memory(key: FieldKey) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys=ON; PRAGMA busy_timeout=5000;")?;
        let vault = Self {
            conn: Mutex::new(conn),
            key: RwLock::new(key),
            path: None,
        };
        vault.init()?;
        Ok(vault)
    }

    /// Get a lock on the connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("vault mutex poisoned")
    }

    /// Integrity check, schema migrations, meta seeding, key check.
    fn init(&self) -> Result<()> {
        let integrity_ok = {
            let conn = self.conn();

            let verdict: String = conn.query_row("PRAGMA integrity_check", [], |row| row.get(0))?;
            let ok = verdict == "ok";
            if !ok {
                tracing::warn!("vault integrity check failed: {verdict}");
            }

            schema::run_all_migrations(&conn)
                .map_err(|e| VaultError::StorageUnavailable(format!("schema setup failed: {e}")))?;
            ok
        };

        let now = now_rfc3339();
        self.set_meta(
            META_INTEGRITY_CHECK,
            if integrity_ok { "pass" } else { "fail" },
        )?;
        self.set_meta(META_INTEGRITY_CHECKED_AT, &now)?;

        // Key fingerprint: seed on first open, verify afterwards.
        let fingerprint = self.key().fingerprint();
        match self.get_meta(META_KEY_FINGERPRINT)? {
            None => self.set_meta(META_KEY_FINGERPRINT, &fingerprint)?,
            Some(stored) if stored == fingerprint => {}
            Some(_) => {
                return Err(VaultError::StorageUnavailable(
                    "encryption key does not match this vault (was the key rotated or lost?)"
                        .into(),
                ));
            }
        }

        if self.get_meta(META_SCHEMA_VERSION)?.is_none() {
            self.set_meta(META_SCHEMA_VERSION, &SCHEMA_VERSION.to_string())?;
        }
        if self.get_meta(META_VAULT_CREATED_AT)?.is_none() {
            self.set_meta(META_VAULT_CREATED_AT, &now)?;
        }
        self.set_meta(
            META_SELECTOR_VERSION,
            crate::selector::SELECTOR_VERSION,
        )?;

        Ok(())
    }

    /// Mirror the installation identity into Meta. The credential store
    /// remains the source of truth; the mirror exists so a wiped or
    /// swapped credential store is detected instead of silently pairing a
    /// fresh identity with an existing vault.
    pub fn mirror_identity(&self, identity_id: &str) -> Result<()> {
        match self.get_meta(META_IDENTITY_ID)? {
            None => self.set_meta(META_IDENTITY_ID, identity_id),
            Some(stored) if stored == identity_id => Ok(()),
            Some(_) => Err(VaultError::StorageUnavailable(
                "installation identity does not match this vault (run the recovery flow)".into(),
            )),
        }
    }

    /// Current field key (cheap copy; 32 bytes).
    pub(crate) fn key(&self) -> FieldKey {
        self.key.read().expect("key lock poisoned").clone()
    }

    pub(crate) fn encrypt(&self, plaintext: &str) -> Result<String> {
        crypto::encrypt_field(plaintext, &self.key())
    }

    pub(crate) fn decrypt(&self, blob: &str) -> Result<String> {
        crypto::decrypt_field(blob, &self.key())
    }

    /// Re-encrypt every sensitive column under `new_key` in one
    /// transaction, updating the stored key fingerprint with it. Either
    /// all rows use the new key afterwards or none do.
    pub fn reencrypt_all(&self, new_key: &FieldKey) -> Result<()> {
        let old_key = self.key();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let reencrypt = |blob: &str| -> Result<String> {
            let plaintext = crypto::decrypt_field(blob, &old_key)?;
            crypto::encrypt_field(&plaintext, new_key)
        };

        let facts: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, object FROM facts")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        for (id, blob) in facts {
            tx.execute(
                "UPDATE facts SET object = ?1 WHERE id = ?2",
                rusqlite::params![reencrypt(&blob)?, id],
            )?;
        }

        let messages: Vec<(i64, String)> = {
            let mut stmt = tx.prepare("SELECT id, content FROM messages")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        for (id, blob) in messages {
            tx.execute(
                "UPDATE messages SET content = ?1 WHERE id = ?2",
                rusqlite::params![reencrypt(&blob)?, id],
            )?;
        }

        let prefs: Vec<(String, String)> = {
            let mut stmt = tx.prepare("SELECT key, value FROM preferences")?;
            let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<std::result::Result<_, _>>()?
        };
        for (key, blob) in prefs {
            tx.execute(
                "UPDATE preferences SET value = ?1 WHERE key = ?2",
                rusqlite::params![reencrypt(&blob)?, key],
            )?;
        }

        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            rusqlite::params![META_KEY_FINGERPRINT, new_key.fingerprint()],
        )?;

        tx.commit()?;

        // Rows are committed under the new key; swap the in-process handle.
        *self.key.write().expect("key lock poisoned") = new_key.clone();
        Ok(())
    }

    /// Row counts for health reporting.
    pub fn stats(&self) -> Result<VaultStats> {
        let conn = self.conn();
        let count = |table: &str| -> Result<i64> {
            conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                row.get(0)
            })
            .map_err(Into::into)
        };
        Ok(VaultStats {
            facts: count("facts")?,
            messages: count("messages")?,
            sessions: count("sessions")?,
            preferences: count("preferences")?,
        })
    }

    /// Database file path (None for in-memory vaults).
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Close the vault and delete its files. Used by the migration engine
    /// when a failed import must leave no partial vault behind.
    pub fn destroy(self) -> Result<()> {
        let path = self.path.clone();
        drop(self.conn);
        if let Some(path) = path {
            for suffix in ["", "-wal", "-shm"] {
                let mut name = path.as_os_str().to_owned();
                name.push(suffix);
                let candidate = PathBuf::from(name);
                if candidate.exists() {
                    std::fs::remove_file(&candidate)?;
                }
            }
        }
        Ok(())
    }
}
