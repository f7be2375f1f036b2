// src/db/schema.rs
// Vault schema and migrations

use anyhow::Result;
use rusqlite::Connection;

/// Schema version written to the meta table. Bump when the layout changes
/// so future readers can detect and migrate again.
pub const SCHEMA_VERSION: i64 = 1;

/// Base schema. Encrypted columns (`facts.object`, `messages.content`,
/// `preferences.value`) hold `iv:ciphertext` blobs, never plaintext.
///
/// The FTS index covers session title/goal only. Encrypted columns must
/// never be added to it, even decrypted-for-convenience — message search
/// goes through decrypt-then-filter in the engine instead.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS facts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    category TEXT NOT NULL,
    predicate TEXT NOT NULL,
    object TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 1.0,
    pii_level INTEGER NOT NULL DEFAULT 0,
    consent_scope TEXT NOT NULL DEFAULT 'default',
    priority REAL NOT NULL DEFAULT 0.0,
    usage_count INTEGER NOT NULL DEFAULT 0,
    last_reinforced_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE(category, predicate)
);

CREATE INDEX IF NOT EXISTS idx_facts_updated ON facts(updated_at DESC);

CREATE TABLE IF NOT EXISTS sessions (
    id TEXT PRIMARY KEY,
    title TEXT NOT NULL DEFAULT '',
    goal TEXT NOT NULL DEFAULT '',
    started_at TEXT NOT NULL,
    message_count INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL REFERENCES sessions(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_session ON messages(session_id);

CREATE TABLE IF NOT EXISTS preferences (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    scope TEXT NOT NULL DEFAULT 'explicit',
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS sessions_fts USING fts5(
    title, goal,
    content='sessions',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS sessions_fts_insert AFTER INSERT ON sessions BEGIN
    INSERT INTO sessions_fts(rowid, title, goal) VALUES (new.rowid, new.title, new.goal);
END;

CREATE TRIGGER IF NOT EXISTS sessions_fts_update AFTER UPDATE OF title, goal ON sessions BEGIN
    INSERT INTO sessions_fts(sessions_fts, rowid, title, goal)
        VALUES ('delete', old.rowid, old.title, old.goal);
    INSERT INTO sessions_fts(rowid, title, goal) VALUES (new.rowid, new.title, new.goal);
END;

CREATE TRIGGER IF NOT EXISTS sessions_fts_delete AFTER DELETE ON sessions BEGIN
    INSERT INTO sessions_fts(sessions_fts, rowid, title, goal)
        VALUES ('delete', old.rowid, old.title, old.goal);
END;
"#;

/// Run all schema setup and migrations.
///
/// Called during vault initialization. Idempotent — existing tables and
/// columns are checked before any change is made.
pub fn run_all_migrations(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    migrate_facts_reinforcement_columns(conn)?;

    Ok(())
}

/// Add reinforcement tracking columns to facts if missing (vaults created
/// before the reinforcement engine shipped).
pub fn migrate_facts_reinforcement_columns(conn: &Connection) -> Result<()> {
    if !column_exists(conn, "facts", "usage_count")? {
        tracing::info!("migrating facts table: adding usage_count");
        conn.execute(
            "ALTER TABLE facts ADD COLUMN usage_count INTEGER NOT NULL DEFAULT 0",
            [],
        )?;
    }
    if !column_exists(conn, "facts", "last_reinforced_at")? {
        tracing::info!("migrating facts table: adding last_reinforced_at");
        conn.execute("ALTER TABLE facts ADD COLUMN last_reinforced_at TEXT", [])?;
    }
    Ok(())
}

/// Check whether a column exists on a table.
fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({table})"))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}
