// src/migration.rs
// One-shot, transaction-guarded import from the legacy JSON store

use crate::crypto::FieldKey;
use crate::db::{
    META_MIGRATION_COMPLETE, META_MIGRATION_COMPLETED_AT, Vault, now_rfc3339,
};
use crate::error::{Result, VaultError};
use crate::legacy::LegacyStore;
use rusqlite::params;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Outcome of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub already_complete: bool,
    pub facts: usize,
    pub sessions: usize,
    pub messages: usize,
    pub preferences: usize,
}

/// Migrate the legacy directory into a vault at `vault_path`.
///
/// Protocol:
/// 1. back up the legacy files; abort if that fails
/// 2. migrate every entity family inside one transaction
/// 3. set `migration_complete` and its timestamp inside that transaction
/// 4. on any error: roll back, destroy the partially-created vault, and
///    restore the legacy backup
///
/// Interrupting the process at any point leaves either a fully migrated
/// vault or the untouched legacy store — never a hybrid.
pub fn migrate_legacy(legacy_dir: &Path, vault_path: &Path, key: FieldKey) -> Result<MigrationReport> {
    // Re-running against a completed vault is a no-op, not an error.
    if vault_path.exists() {
        let vault = Vault::open(vault_path, key.clone())?;
        if vault.get_meta(META_MIGRATION_COMPLETE)?.as_deref() == Some("1") {
            tracing::info!("migration already complete, nothing to do");
            return Ok(MigrationReport {
                already_complete: true,
                facts: 0,
                sessions: 0,
                messages: 0,
                preferences: 0,
            });
        }
    }

    let backup_dir = backup_legacy(legacy_dir)?;
    let legacy = LegacyStore::load(legacy_dir);

    let attempt = legacy.and_then(|legacy| {
        let vault = Vault::open(vault_path, key)?;
        match migrate_into(&vault, &legacy) {
            Ok(report) => Ok(report),
            Err(e) => {
                // Transaction already rolled back; remove the partial vault
                // so the next run starts clean.
                if let Err(destroy_err) = vault.destroy() {
                    tracing::warn!("failed to remove partial vault: {destroy_err}");
                }
                Err(e)
            }
        }
    });

    match attempt {
        Ok(report) => {
            tracing::info!(
                facts = report.facts,
                sessions = report.sessions,
                messages = report.messages,
                preferences = report.preferences,
                "legacy migration complete"
            );
            Ok(report)
        }
        Err(e) => {
            restore_legacy(&backup_dir, legacy_dir);
            Err(VaultError::Migration(format!("migration failed: {e}")))
        }
    }
}

/// All entity families plus the completion flag, in one transaction.
fn migrate_into(vault: &Vault, legacy: &LegacyStore) -> Result<MigrationReport> {
    let fact_inputs = legacy.fact_inputs();
    let session_rows = legacy.session_rows();
    let message_rows = legacy.message_rows()?;
    let preference_rows = legacy.preference_rows();

    let mut report = MigrationReport {
        already_complete: false,
        facts: 0,
        sessions: 0,
        messages: 0,
        preferences: 0,
    };

    let now = now_rfc3339();
    let mut conn = vault.conn();
    let tx = conn.transaction()?;

    for input in &fact_inputs {
        let blob = crate::crypto::encrypt_field(&input.object, &vault.key())?;
        tx.execute(
            "INSERT INTO facts (category, predicate, object, confidence, pii_level, \
                                consent_scope, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
             ON CONFLICT(category, predicate) DO UPDATE SET
                 object = excluded.object,
                 confidence = excluded.confidence,
                 pii_level = excluded.pii_level,
                 consent_scope = excluded.consent_scope,
                 updated_at = excluded.updated_at",
            params![
                input.category,
                input.predicate,
                blob,
                input.confidence,
                input.pii_level as i64,
                input.consent_scope.as_str(),
                now,
            ],
        )?;
        report.facts += 1;
    }

    for (id, title, goal, started_at) in &session_rows {
        tx.execute(
            "INSERT INTO sessions (id, title, goal, started_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, goal = excluded.goal",
            params![id, title, goal, started_at],
        )?;
        report.sessions += 1;
    }

    for (session_id, role, content, created_at) in &message_rows {
        let blob = crate::crypto::encrypt_field(content, &vault.key())?;
        tx.execute(
            "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![session_id, created_at],
        )?;
        tx.execute(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), blob, created_at],
        )?;
        tx.execute(
            "UPDATE sessions SET message_count = message_count + 1 WHERE id = ?1",
            params![session_id],
        )?;
        report.messages += 1;
    }

    for (key, value, scope) in &preference_rows {
        let blob = crate::crypto::encrypt_field(value, &vault.key())?;
        tx.execute(
            "INSERT INTO preferences (key, value, scope, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(key) DO UPDATE SET
                 value = excluded.value, scope = excluded.scope, updated_at = excluded.updated_at",
            params![key, blob, scope.as_str(), now],
        )?;
        report.preferences += 1;
    }

    // The completion flag commits atomically with the rows above, so
    // migration_complete can never be observed half-true.
    for (key, value) in [
        (META_MIGRATION_COMPLETE, "1"),
        (META_MIGRATION_COMPLETED_AT, now.as_str()),
    ] {
        tx.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
    }

    tx.commit()?;
    Ok(report)
}

/// Copy every legacy file into a sibling backup directory. Overwrites a
/// stale backup from a previous failed run.
fn backup_legacy(legacy_dir: &Path) -> Result<PathBuf> {
    if !legacy_dir.is_dir() {
        return Err(VaultError::Migration(format!(
            "legacy directory {} does not exist",
            legacy_dir.display()
        )));
    }

    let backup_dir = backup_path(legacy_dir);
    if backup_dir.exists() {
        std::fs::remove_dir_all(&backup_dir)
            .map_err(|e| VaultError::Migration(format!("cannot clear old backup: {e}")))?;
    }
    std::fs::create_dir_all(&backup_dir)
        .map_err(|e| VaultError::Migration(format!("cannot create backup dir: {e}")))?;

    for entry in std::fs::read_dir(legacy_dir)
        .map_err(|e| VaultError::Migration(format!("cannot read legacy dir: {e}")))?
    {
        let entry = entry.map_err(|e| VaultError::Migration(format!("backup failed: {e}")))?;
        if entry.path().is_file() {
            std::fs::copy(entry.path(), backup_dir.join(entry.file_name()))
                .map_err(|e| VaultError::Migration(format!("backup failed: {e}")))?;
        }
    }

    tracing::info!("legacy data backed up to {}", backup_dir.display());
    Ok(backup_dir)
}

/// Restore the legacy directory from its backup. Best-effort: migration
/// never modifies the legacy files, so this only guards against outside
/// interference.
fn restore_legacy(backup_dir: &Path, legacy_dir: &Path) {
    let entries = match std::fs::read_dir(backup_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::error!("cannot read legacy backup for restore: {e}");
            return;
        }
    };
    for entry in entries.flatten() {
        if let Err(e) = std::fs::copy(entry.path(), legacy_dir.join(entry.file_name())) {
            tracing::error!("failed to restore {:?}: {e}", entry.file_name());
        }
    }
    tracing::info!("legacy data restored from backup");
}

/// `<legacy_dir>.backup`, next to the legacy directory.
pub fn backup_path(legacy_dir: &Path) -> PathBuf {
    let mut name = legacy_dir.as_os_str().to_owned();
    name.push(".backup");
    PathBuf::from(name)
}
