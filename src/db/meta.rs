// src/db/meta.rs
// Singleton key-value meta rows

use super::Vault;
use crate::error::Result;
use rusqlite::params;
use std::collections::BTreeMap;

pub const META_SCHEMA_VERSION: &str = "schema_version";
pub const META_MIGRATION_COMPLETE: &str = "migration_complete";
pub const META_MIGRATION_COMPLETED_AT: &str = "migration_completed_at";
pub const META_IDENTITY_ID: &str = "identity_id";
pub const META_SELECTOR_VERSION: &str = "selector_version";
pub const META_VAULT_CREATED_AT: &str = "vault_created_at";
pub const META_INTEGRITY_CHECK: &str = "integrity_check";
pub const META_INTEGRITY_CHECKED_AT: &str = "integrity_checked_at";
pub const META_KEY_FINGERPRINT: &str = "key_fingerprint";

impl Vault {
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn();
        match conn.query_row(
            "SELECT value FROM meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        ) {
            Ok(value) => Ok(Some(value)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn();
        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// All meta rows, sorted by key.
    pub fn get_all_meta(&self) -> Result<BTreeMap<String, String>> {
        let conn = self.conn();
        let mut stmt = conn.prepare("SELECT key, value FROM meta")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;
        let mut map = BTreeMap::new();
        for row in rows {
            let (key, value): (String, String) = row?;
            map.insert(key, value);
        }
        Ok(map)
    }
}
