// src/db/prefs.rs
// Preference storage

use super::types::{PrefScope, Preference, now_rfc3339};
use super::Vault;
use crate::error::Result;
use rusqlite::params;

impl Vault {
    pub fn set_preference(&self, key: &str, value: &str, scope: PrefScope) -> Result<()> {
        let blob = self.encrypt(value)?;
        let now = now_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO preferences (key, value, scope, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value,
                 scope = excluded.scope,
                 updated_at = excluded.updated_at",
            params![key, blob, scope.as_str(), now],
        )?;
        Ok(())
    }

    pub fn get_preference(&self, key: &str) -> Result<Option<Preference>> {
        let row = {
            let conn = self.conn();
            match conn.query_row(
                "SELECT key, value, scope, updated_at FROM preferences WHERE key = ?1",
                params![key],
                parse_preference_row,
            ) {
                Ok(pref) => Some(pref),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };
        match row {
            Some(mut pref) => {
                pref.value = self.decrypt(&pref.value)?;
                Ok(Some(pref))
            }
            None => Ok(None),
        }
    }

    /// All preferences, decrypted, ordered by key.
    pub fn get_preferences(&self) -> Result<Vec<Preference>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT key, value, scope, updated_at FROM preferences ORDER BY key ASC",
            )?;
            let rows = stmt.query_map([], parse_preference_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|mut pref| {
                pref.value = self.decrypt(&pref.value)?;
                Ok(pref)
            })
            .collect()
    }
}

fn parse_preference_row(row: &rusqlite::Row) -> rusqlite::Result<Preference> {
    let scope_raw: String = row.get(2)?;
    Ok(Preference {
        key: row.get(0)?,
        value: row.get(1)?,
        scope: PrefScope::parse(&scope_raw).unwrap_or(PrefScope::Implicit),
        updated_at: row.get(3)?,
    })
}
