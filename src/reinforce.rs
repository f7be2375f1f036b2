// src/reinforce.rs
// Usage-based priority boosts for facts named in a completed goal

use crate::db::Vault;
use crate::error::{Result, VaultError};
use serde::Serialize;
use std::collections::BTreeSet;

/// Hard cap on fact ids accepted per call.
pub const MAX_REINFORCE_BATCH: usize = 32;

/// A fact reinforced within this window is not boosted again; one boost
/// per completed goal, not one per report.
pub const REINFORCE_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone, Serialize)]
pub struct ReinforcementReport {
    /// Distinct fact ids named by the caller.
    pub requested: usize,
    /// Facts actually boosted this call.
    pub applied: usize,
    /// Ids skipped: reinforced too recently, unknown, or not fact slices.
    pub skipped: usize,
}

/// Boost the facts named by slice ids (`fact:<n>`), deduplicated, capped,
/// and committed in one transaction — a partial failure touches no rows.
///
/// Bundles legitimately contain message and preference slices; those ids
/// are counted as skipped rather than rejected.
pub fn reinforce(vault: &Vault, slice_ids: &[String]) -> Result<ReinforcementReport> {
    if slice_ids.len() > MAX_REINFORCE_BATCH {
        return Err(VaultError::Validation(format!(
            "too many fact ids ({} > {MAX_REINFORCE_BATCH})",
            slice_ids.len()
        )));
    }

    let distinct: BTreeSet<&String> = slice_ids.iter().collect();
    let fact_ids: Vec<i64> = distinct.iter().filter_map(|id| parse_fact_id(id)).collect();

    let applied = vault.reinforce_facts(&fact_ids, REINFORCE_WINDOW_SECS)?;
    Ok(ReinforcementReport {
        requested: distinct.len(),
        applied,
        skipped: distinct.len() - applied,
    })
}

/// Parse a `fact:<n>` slice id.
fn parse_fact_id(slice_id: &str) -> Option<i64> {
    slice_id.strip_prefix("fact:")?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::FieldKey;
    use crate::db::{ConsentScope, FactInput};

    fn vault_with_fact() -> (Vault, i64) {
        let vault = Vault::open_in_memory(FieldKey::generate()).unwrap();
        let id = vault
            .set_fact(&FactInput {
                category: "location".into(),
                predicate: "city".into(),
                object: "Philadelphia".into(),
                confidence: 1.0,
                pii_level: 1,
                consent_scope: ConsentScope::Default,
            })
            .unwrap();
        (vault, id)
    }

    #[test]
    fn test_reinforce_applies_once_within_window() {
        let (vault, id) = vault_with_fact();
        let ids = vec![format!("fact:{id}")];

        let first = reinforce(&vault, &ids).unwrap();
        assert_eq!(first.applied, 1);

        // Rapid second report of the same completed goal: no double count
        let second = reinforce(&vault, &ids).unwrap();
        assert_eq!(second.applied, 0);
        assert_eq!(second.skipped, 1);

        let fact = vault.get_fact(id).unwrap().unwrap();
        assert_eq!(fact.usage_count, 1);
    }

    #[test]
    fn test_duplicate_ids_deduplicated() {
        let (vault, id) = vault_with_fact();
        let ids = vec![format!("fact:{id}"), format!("fact:{id}")];
        let report = reinforce(&vault, &ids).unwrap();
        assert_eq!(report.requested, 1);
        assert_eq!(report.applied, 1);
        assert_eq!(vault.get_fact(id).unwrap().unwrap().usage_count, 1);
    }

    #[test]
    fn test_non_fact_slices_skipped() {
        let (vault, id) = vault_with_fact();
        let ids = vec![
            format!("fact:{id}"),
            "msg:4".to_string(),
            "pref:tone".to_string(),
        ];
        let report = reinforce(&vault, &ids).unwrap();
        assert_eq!(report.applied, 1);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_batch_cap_enforced() {
        let (vault, _id) = vault_with_fact();
        let ids: Vec<String> = (0..MAX_REINFORCE_BATCH + 1)
            .map(|i| format!("fact:{i}"))
            .collect();
        assert!(matches!(
            reinforce(&vault, &ids),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_empty_call_is_noop() {
        let (vault, _id) = vault_with_fact();
        let report = reinforce(&vault, &[]).unwrap();
        assert_eq!(report.requested, 0);
        assert_eq!(report.applied, 0);
    }
}
