// src/db/messages.rs
// Message and session storage, plus session full-text search

use super::types::{Message, Role, Session, now_rfc3339};
use super::Vault;
use crate::error::{Result, VaultError};
use rusqlite::params;

fn parse_message_row(row: &rusqlite::Row) -> rusqlite::Result<Message> {
    let role_raw: String = row.get(2)?;
    Ok(Message {
        id: row.get(0)?,
        session_id: row.get(1)?,
        role: Role::parse(&role_raw).unwrap_or(Role::Assistant),
        content: row.get(3)?,
        created_at: row.get(4)?,
    })
}

fn parse_session_row(row: &rusqlite::Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: row.get(0)?,
        title: row.get(1)?,
        goal: row.get(2)?,
        started_at: row.get(3)?,
        message_count: row.get(4)?,
    })
}

impl Vault {
    /// Append one conversation turn. Creates the session row on first use
    /// and bumps its message count; the whole operation is one transaction.
    pub fn add_message(&self, session_id: &str, role: Role, content: &str) -> Result<i64> {
        let blob = self.encrypt(content)?;
        let now = now_rfc3339();

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT OR IGNORE INTO sessions (id, started_at) VALUES (?1, ?2)",
            params![session_id, now],
        )?;
        tx.execute(
            "INSERT INTO messages (session_id, role, content, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, role.as_str(), blob, now],
        )?;
        tx.execute(
            "UPDATE sessions SET message_count = message_count + 1 WHERE id = ?1",
            params![session_id],
        )?;
        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(id)
    }

    /// Set or update a session's plaintext title and goal summary. These
    /// two columns are the only searchable conversation surface.
    pub fn upsert_session(&self, session_id: &str, title: &str, goal: &str) -> Result<()> {
        let now = now_rfc3339();
        let conn = self.conn();
        conn.execute(
            "INSERT INTO sessions (id, title, goal, started_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET title = excluded.title, goal = excluded.goal",
            params![session_id, title, goal, now],
        )?;
        Ok(())
    }

    /// Last `n` messages in chronological order, decrypted.
    pub fn get_recent_messages(&self, n: usize) -> Result<Vec<Message>> {
        let mut rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, created_at
                 FROM messages ORDER BY id DESC LIMIT ?1",
            )?;
            let rows = stmt.query_map(params![n as i64], parse_message_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };
        rows.reverse();

        rows.into_iter()
            .map(|mut message| {
                message.content = self.decrypt(&message.content)?;
                Ok(message)
            })
            .collect()
    }

    /// Full-text search over session title and goal.
    ///
    /// Terms are quoted before hitting FTS so user input cannot smuggle
    /// query syntax; if FTS still rejects the query, falls back to a LIKE
    /// scan with escaped wildcards.
    pub fn search_sessions(&self, query: &str, limit: usize) -> Result<Vec<Session>> {
        let fts_query = quote_fts_terms(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.conn();
        let fts_result = (|| -> rusqlite::Result<Vec<Session>> {
            let mut stmt = conn.prepare(
                "SELECT s.id, s.title, s.goal, s.started_at, s.message_count
                 FROM sessions_fts
                 JOIN sessions s ON s.rowid = sessions_fts.rowid
                 WHERE sessions_fts MATCH ?1
                 ORDER BY sessions_fts.rank, s.id ASC
                 LIMIT ?2",
            )?;
            let rows = stmt.query_map(params![fts_query, limit as i64], parse_session_row)?;
            rows.collect()
        })();

        match fts_result {
            Ok(sessions) => Ok(sessions),
            Err(e) => {
                tracing::debug!("FTS query rejected, falling back to LIKE scan: {e}");
                let pattern = format!("%{}%", escape_like(query));
                let mut stmt = conn.prepare(
                    "SELECT id, title, goal, started_at, message_count
                     FROM sessions
                     WHERE title LIKE ?1 ESCAPE '\\' OR goal LIKE ?1 ESCAPE '\\'
                     ORDER BY started_at DESC, id ASC
                     LIMIT ?2",
                )?;
                let rows = stmt.query_map(params![pattern, limit as i64], parse_session_row)?;
                rows.collect::<std::result::Result<Vec<_>, _>>()
                    .map_err(VaultError::from)
            }
        }
    }

    /// Search message content by decrypt-then-filter.
    ///
    /// Deliberately a linear scan: message content never enters a search
    /// index, so finding it costs one decrypt per row. Matching is
    /// case-insensitive substring.
    pub fn search_messages(&self, query: &str, limit: usize) -> Result<Vec<Message>> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(
                "SELECT id, session_id, role, content, created_at
                 FROM messages ORDER BY id DESC",
            )?;
            let rows = stmt.query_map([], parse_message_row)?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        let mut hits = Vec::new();
        for mut message in rows {
            message.content = self.decrypt(&message.content)?;
            if message.content.to_lowercase().contains(&needle) {
                hits.push(message);
                if hits.len() >= limit {
                    break;
                }
            }
        }
        Ok(hits)
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let conn = self.conn();
        match conn.query_row(
            "SELECT id, title, goal, started_at, message_count FROM sessions WHERE id = ?1",
            params![session_id],
            parse_session_row,
        ) {
            Ok(session) => Ok(Some(session)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Explicit "clear conversation": removes the session and, via
    /// cascade, all of its messages. Irreversible.
    pub fn clear_session(&self, session_id: &str) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
        Ok(deleted > 0)
    }
}

/// Quote each whitespace-separated term so FTS treats it as a literal.
fn quote_fts_terms(query: &str) -> String {
    query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Escape SQL LIKE wildcards so user input cannot inject patterns.
fn escape_like(query: &str) -> String {
    query
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
