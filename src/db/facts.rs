// src/db/facts.rs
// Fact storage: upsert, filtered reads, deletion, reinforcement updates

use super::types::{ConsentScope, Fact, FactFilter, FactInput, now_rfc3339};
use super::Vault;
use crate::error::Result;
use chrono::{Duration, SecondsFormat, Utc};
use rusqlite::params;

/// Priority added per reinforcement, and the bound it saturates at.
pub const PRIORITY_STEP: f64 = 0.1;
pub const PRIORITY_CAP: f64 = 10.0;

/// Column list shared by every fact SELECT; must stay in sync with
/// `parse_fact_row`.
const FACT_COLUMNS: &str = "id, category, predicate, object, confidence, pii_level, \
     consent_scope, priority, usage_count, last_reinforced_at, created_at, updated_at";

/// Parse a fact row with the standard column order. `object` is still the
/// encrypted blob at this point; the caller decrypts.
fn parse_fact_row(row: &rusqlite::Row) -> rusqlite::Result<Fact> {
    let consent_raw: String = row.get(6)?;
    let pii: i64 = row.get(5)?;
    Ok(Fact {
        id: row.get(0)?,
        category: row.get(1)?,
        predicate: row.get(2)?,
        object: row.get(3)?,
        confidence: row.get(4)?,
        pii_level: pii.clamp(0, 2) as u8,
        consent_scope: ConsentScope::parse(&consent_raw).unwrap_or(ConsentScope::NeverUpload),
        priority: row.get(7)?,
        usage_count: row.get(8)?,
        last_reinforced_at: row.get(9)?,
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

impl Vault {
    /// Upsert a fact on (category, predicate). Returns the fact id.
    ///
    /// Priority and usage are preserved across updates — reinforcement
    /// history belongs to the triple, not to a particular value.
    pub fn set_fact(&self, input: &FactInput) -> Result<i64> {
        let blob = self.encrypt(&input.object)?;
        let now = now_rfc3339();
        let conn = self.conn();

        conn.execute(
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

        let id = conn.query_row(
            "SELECT id FROM facts WHERE category = ?1 AND predicate = ?2",
            params![input.category, input.predicate],
            |row| row.get(0),
        )?;
        Ok(id)
    }

    /// Read facts matching the filter, decrypted, newest first.
    pub fn get_facts(&self, filter: &FactFilter) -> Result<Vec<Fact>> {
        let rows = {
            let conn = self.conn();
            let mut stmt = conn.prepare(&format!(
                "SELECT {FACT_COLUMNS} FROM facts
                 WHERE (?1 IS NULL OR category = ?1)
                   AND (?2 IS NULL OR pii_level <= ?2)
                 ORDER BY updated_at DESC, id ASC"
            ))?;
            let rows = stmt.query_map(
                params![filter.category, filter.max_pii.map(|p| p as i64)],
                parse_fact_row,
            )?;
            rows.collect::<std::result::Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|mut fact| {
                fact.object = self.decrypt(&fact.object)?;
                Ok(fact)
            })
            .collect()
    }

    pub fn get_fact(&self, id: i64) -> Result<Option<Fact>> {
        let row = {
            let conn = self.conn();
            match conn.query_row(
                &format!("SELECT {FACT_COLUMNS} FROM facts WHERE id = ?1"),
                params![id],
                parse_fact_row,
            ) {
                Ok(fact) => Some(fact),
                Err(rusqlite::Error::QueryReturnedNoRows) => None,
                Err(e) => return Err(e.into()),
            }
        };
        match row {
            Some(mut fact) => {
                fact.object = self.decrypt(&fact.object)?;
                Ok(Some(fact))
            }
            None => Ok(None),
        }
    }

    /// Delete a fact. Immediate and irreversible; no tombstone.
    pub fn delete_fact(&self, id: i64) -> Result<bool> {
        let conn = self.conn();
        let deleted = conn.execute("DELETE FROM facts WHERE id = ?1", params![id])?;
        Ok(deleted > 0)
    }

    /// Apply one reinforcement boost to each fact id, in one transaction.
    ///
    /// A fact already reinforced within `window_secs` is skipped, so a
    /// caller reporting the same completed goal twice counts once. Returns
    /// the number of facts actually boosted.
    pub fn reinforce_facts(&self, ids: &[i64], window_secs: i64) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let now = now_rfc3339();
        let cutoff = (Utc::now() - Duration::seconds(window_secs))
            .to_rfc3339_opts(SecondsFormat::Micros, true);

        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let mut applied = 0;
        for &id in ids {
            applied += tx.execute(
                "UPDATE facts SET
                     usage_count = usage_count + 1,
                     priority = MIN(priority + ?1, ?2),
                     last_reinforced_at = ?3
                 WHERE id = ?4
                   AND (last_reinforced_at IS NULL OR last_reinforced_at <= ?5)",
                params![PRIORITY_STEP, PRIORITY_CAP, now, id, cutoff],
            )?;
        }
        tx.commit()?;
        Ok(applied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;

    fn vault() -> Vault {
        Vault::open_in_memory(FieldKey::generate()).unwrap()
    }

    fn city_fact() -> FactInput {
        FactInput {
            category: "location".into(),
            predicate: "city".into(),
            object: "Philadelphia".into(),
            confidence: 0.9,
            pii_level: 1,
            consent_scope: ConsentScope::Default,
        }
    }

    #[test]
    fn test_set_fact_upserts_on_category_predicate() {
        let vault = vault();
        let id1 = vault.set_fact(&city_fact()).unwrap();

        let mut moved = city_fact();
        moved.object = "Boston".into();
        let id2 = vault.set_fact(&moved).unwrap();
        assert_eq!(id1, id2);

        let facts = vault.get_facts(&FactFilter::default()).unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].object, "Boston");
    }

    #[test]
    fn test_object_encrypted_at_rest() {
        let vault = vault();
        vault.set_fact(&city_fact()).unwrap();

        let raw: String = vault
            .conn()
            .query_row("SELECT object FROM facts", [], |row| row.get(0))
            .unwrap();
        assert!(!raw.contains("Philadelphia"));
        assert!(raw.contains(':'));
    }

    #[test]
    fn test_upsert_preserves_priority() {
        let vault = vault();
        let id = vault.set_fact(&city_fact()).unwrap();
        vault.reinforce_facts(&[id], 0).unwrap();

        vault.set_fact(&city_fact()).unwrap();
        let fact = vault.get_fact(id).unwrap().unwrap();
        assert!(fact.priority > 0.0);
        assert_eq!(fact.usage_count, 1);
    }

    #[test]
    fn test_get_facts_filters() {
        let vault = vault();
        vault.set_fact(&city_fact()).unwrap();
        vault
            .set_fact(&FactInput {
                category: "personal".into(),
                predicate: "name".into(),
                object: "Colin".into(),
                confidence: 1.0,
                pii_level: 2,
                consent_scope: ConsentScope::NeverUpload,
            })
            .unwrap();

        let by_category = vault
            .get_facts(&FactFilter {
                category: Some("location".into()),
                max_pii: None,
            })
            .unwrap();
        assert_eq!(by_category.len(), 1);

        let by_pii = vault
            .get_facts(&FactFilter {
                category: None,
                max_pii: Some(1),
            })
            .unwrap();
        assert_eq!(by_pii.len(), 1);
        assert_eq!(by_pii[0].category, "location");
    }

    #[test]
    fn test_delete_fact() {
        let vault = vault();
        let id = vault.set_fact(&city_fact()).unwrap();
        assert!(vault.delete_fact(id).unwrap());
        assert!(!vault.delete_fact(id).unwrap());
        assert!(vault.get_fact(id).unwrap().is_none());
    }

    #[test]
    fn test_reinforce_window_skips_recent() {
        let vault = vault();
        let id = vault.set_fact(&city_fact()).unwrap();

        // First boost lands, second within the window is skipped
        assert_eq!(vault.reinforce_facts(&[id], 3600).unwrap(), 1);
        assert_eq!(vault.reinforce_facts(&[id], 3600).unwrap(), 0);

        let fact = vault.get_fact(id).unwrap().unwrap();
        assert_eq!(fact.usage_count, 1);

        // Zero-length window allows another boost
        assert_eq!(vault.reinforce_facts(&[id], 0).unwrap(), 1);
    }

    #[test]
    fn test_reinforce_priority_bounded() {
        let vault = vault();
        let id = vault.set_fact(&city_fact()).unwrap();
        for _ in 0..200 {
            vault.reinforce_facts(&[id], 0).unwrap();
        }
        let fact = vault.get_fact(id).unwrap().unwrap();
        assert!(fact.priority <= PRIORITY_CAP);
    }

    #[test]
    fn test_reinforce_unknown_id_touches_nothing() {
        let vault = vault();
        assert_eq!(vault.reinforce_facts(&[999], 0).unwrap(), 0);
    }
}
