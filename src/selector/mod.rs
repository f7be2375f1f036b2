// src/selector/mod.rs
// Deterministic context selection: score, order, filter, pack

mod scoring;

pub use scoring::{estimate_tokens, lexical_relevance};

use crate::crypto::stable_hash;
use crate::db::{ConsentScope, Fact, Message, Preference, Vault};
use crate::error::Result;
use serde::Serialize;

/// Pinned identifier for this scoring/packing algorithm. Changing any
/// weight or ordering rule means bumping this, never editing in place.
pub const SELECTOR_VERSION: &str = "v1";

/// Relevance weight α for SELECTOR_VERSION "v1". Fixed per version — not
/// a per-call knob — so identical inputs always produce identical output.
const RELEVANCE_WEIGHT: f64 = 0.7;

/// PII ceiling applied when the caller does not ask for more.
pub const DEFAULT_MAX_PII: u8 = 1;

/// Hard ceiling on any caller-supplied token budget.
pub const TOKEN_BUDGET_CEILING: usize = 4000;

/// How many recent messages are considered as candidate slices.
pub const RECENT_MESSAGE_WINDOW: usize = 20;

/// Caller-declared selection policy.
#[derive(Debug, Clone, Copy)]
pub struct SelectionPolicy {
    pub max_pii: u8,
    pub token_budget: usize,
}

/// Plaintext view of the vault taken at one instant. The selector is a
/// pure function over this value; it never touches storage itself.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    pub facts: Vec<Fact>,
    pub messages: Vec<Message>,
    pub preferences: Vec<Preference>,
}

impl Snapshot {
    /// Read the candidate slices out of the vault.
    pub fn collect(vault: &Vault) -> Result<Self> {
        Ok(Self {
            facts: vault.get_facts(&Default::default())?,
            messages: vault.get_recent_messages(RECENT_MESSAGE_WINDOW)?,
            preferences: vault.get_preferences()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SliceKind {
    Fact,
    Message,
    Preference,
}

/// One packed unit of context.
#[derive(Debug, Clone, Serialize)]
pub struct Slice {
    pub id: String,
    pub kind: SliceKind,
    pub text: String,
    pub tokens: usize,
}

/// The selector's output: slices in packed order plus everything a caller
/// needs to prove reproducibility and to name the facts that were used.
#[derive(Debug, Clone, Serialize)]
pub struct ContextBundle {
    pub selector_version: String,
    pub hash: String,
    pub total_tokens: usize,
    pub slices: Vec<Slice>,
}

struct Candidate {
    slice: Slice,
    pii_level: u8,
    consent_scope: ConsentScope,
    score: f64,
    updated_at: String,
    // Tie-break key: kind first, then numeric id, then string key.
    kind_rank: u8,
    numeric_id: i64,
    key_id: String,
}

/// Build a context bundle for `goal` from a vault snapshot.
///
/// Steps: gather candidates, score each one, stable-sort, apply consent
/// and PII filters, then greedily pack whole slices into the budget. An
/// empty candidate set yields an empty bundle with a valid hash.
pub fn build_context(goal: &str, snapshot: &Snapshot, policy: &SelectionPolicy) -> ContextBundle {
    // 1. Gather
    let mut candidates: Vec<Candidate> = Vec::new();

    for fact in &snapshot.facts {
        let text = format!("{} {}: {}", fact.category, fact.predicate, fact.object);
        candidates.push(Candidate {
            pii_level: fact.pii_level,
            consent_scope: fact.consent_scope,
            score: score_slice(goal, &text, fact.priority),
            updated_at: fact.updated_at.clone(),
            kind_rank: 0,
            numeric_id: fact.id,
            key_id: String::new(),
            slice: make_slice(format!("fact:{}", fact.id), SliceKind::Fact, text),
        });
    }

    for message in &snapshot.messages {
        let text = format!("{}: {}", message.role.as_str(), message.content);
        candidates.push(Candidate {
            pii_level: 1,
            consent_scope: ConsentScope::Default,
            score: score_slice(goal, &text, 0.0),
            updated_at: message.created_at.clone(),
            kind_rank: 1,
            numeric_id: message.id,
            key_id: String::new(),
            slice: make_slice(format!("msg:{}", message.id), SliceKind::Message, text),
        });
    }

    for pref in &snapshot.preferences {
        let text = format!("prefers {} = {}", pref.key, pref.value);
        candidates.push(Candidate {
            pii_level: 1,
            consent_scope: ConsentScope::Default,
            score: score_slice(goal, &text, 0.0),
            updated_at: pref.updated_at.clone(),
            kind_rank: 2,
            numeric_id: 0,
            key_id: pref.key.clone(),
            slice: make_slice(format!("pref:{}", pref.key), SliceKind::Preference, text),
        });
    }

    // 2-3. Stable order: score desc, recency desc, id asc. The id leg
    // makes ordering total even when score and timestamp collide.
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| b.updated_at.cmp(&a.updated_at))
            .then_with(|| a.kind_rank.cmp(&b.kind_rank))
            .then_with(|| a.numeric_id.cmp(&b.numeric_id))
            .then_with(|| a.key_id.cmp(&b.key_id))
    });

    // 4. Consent and PII filters apply regardless of score.
    candidates.retain(|c| {
        c.consent_scope != ConsentScope::NeverUpload && c.pii_level <= policy.max_pii
    });

    // 5. Greedy whole-slice packing; a slice that does not fit is skipped
    // and packing continues with lower-ranked ones.
    let mut slices = Vec::new();
    let mut remaining = policy.token_budget;
    for candidate in candidates {
        if candidate.slice.tokens <= remaining {
            remaining -= candidate.slice.tokens;
            slices.push(candidate.slice);
        }
    }

    let total_tokens = slices.iter().map(|s| s.tokens).sum();
    let hash = bundle_hash(&slices);
    ContextBundle {
        selector_version: SELECTOR_VERSION.to_string(),
        hash,
        total_tokens,
        slices,
    }
}

fn make_slice(id: String, kind: SliceKind, text: String) -> Slice {
    let tokens = estimate_tokens(&text);
    Slice {
        id,
        kind,
        text,
        tokens,
    }
}

/// Weighted slice score: α · lexical relevance + (1−α) · normalized
/// stored priority. Recency is handled by the sort's timestamp leg so no
/// wall-clock term can perturb reproducibility.
fn score_slice(goal: &str, text: &str, priority: f64) -> f64 {
    let relevance = lexical_relevance(goal, text);
    let priority_norm = (priority / crate::db::PRIORITY_CAP).clamp(0.0, 1.0);
    RELEVANCE_WEIGHT * relevance + (1.0 - RELEVANCE_WEIGHT) * priority_norm
}

/// Canonical digest of a packed bundle. Two identical bundles hash
/// identically; an empty bundle still hashes the version header.
fn bundle_hash(slices: &[Slice]) -> String {
    let mut canonical = String::from(SELECTOR_VERSION);
    canonical.push('\n');
    for slice in slices {
        canonical.push_str(&slice.id);
        canonical.push('\t');
        canonical.push_str(&slice.text);
        canonical.push('\n');
    }
    stable_hash(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Role;

    fn fact(id: i64, category: &str, predicate: &str, object: &str) -> Fact {
        Fact {
            id,
            category: category.into(),
            predicate: predicate.into(),
            object: object.into(),
            confidence: 1.0,
            pii_level: 1,
            consent_scope: ConsentScope::Default,
            priority: 0.0,
            usage_count: 0,
            last_reinforced_at: None,
            created_at: "2026-01-01T00:00:00.000000Z".into(),
            updated_at: "2026-01-01T00:00:00.000000Z".into(),
        }
    }

    fn policy(budget: usize) -> SelectionPolicy {
        SelectionPolicy {
            max_pii: 1,
            token_budget: budget,
        }
    }

    #[test]
    fn test_deterministic_output() {
        let snapshot = Snapshot {
            facts: vec![
                fact(1, "location", "city", "Philadelphia"),
                fact(2, "food", "favorite", "ramen"),
            ],
            messages: vec![Message {
                id: 1,
                session_id: "s1".into(),
                role: Role::User,
                content: "what's the weather like".into(),
                created_at: "2026-01-02T00:00:00.000000Z".into(),
            }],
            preferences: vec![],
        };
        let a = build_context("weather today", &snapshot, &policy(500));
        let b = build_context("weather today", &snapshot, &policy(500));
        assert_eq!(a.hash, b.hash);
        let ids_a: Vec<&str> = a.slices.iter().map(|s| s.id.as_str()).collect();
        let ids_b: Vec<&str> = b.slices.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[test]
    fn test_tie_break_by_id_ascending() {
        // Equal priority, equal timestamp, equal (zero) relevance: only
        // the id decides, reproducibly.
        let snapshot = Snapshot {
            facts: vec![
                fact(12, "work", "employer", "Acme"),
                fact(3, "work", "title", "Engineer"),
            ],
            messages: vec![],
            preferences: vec![],
        };
        let bundle = build_context("unrelated goal", &snapshot, &policy(500));
        let ids: Vec<&str> = bundle.slices.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["fact:3", "fact:12"]);
    }

    #[test]
    fn test_never_upload_excluded_regardless_of_score() {
        let mut name = fact(1, "personal", "name", "Colin");
        name.consent_scope = ConsentScope::NeverUpload;
        name.priority = 10.0;
        let snapshot = Snapshot {
            facts: vec![name, fact(2, "location", "city", "Philadelphia")],
            messages: vec![],
            preferences: vec![],
        };
        let bundle = build_context("name Colin personal", &snapshot, &policy(500));
        assert!(bundle.slices.iter().all(|s| s.id != "fact:1"));
        assert!(bundle.slices.iter().any(|s| s.id == "fact:2"));
    }

    #[test]
    fn test_pii_ceiling_enforced() {
        let mut sensitive = fact(1, "health", "condition", "private");
        sensitive.pii_level = 2;
        let snapshot = Snapshot {
            facts: vec![sensitive, fact(2, "location", "city", "Philadelphia")],
            messages: vec![],
            preferences: vec![],
        };
        let bundle = build_context("anything", &snapshot, &policy(500));
        assert!(bundle.slices.iter().all(|s| s.id != "fact:1"));

        let elevated = build_context(
            "anything",
            &snapshot,
            &SelectionPolicy {
                max_pii: 2,
                token_budget: 500,
            },
        );
        assert!(elevated.slices.iter().any(|s| s.id == "fact:1"));
    }

    #[test]
    fn test_budget_packs_whole_slices_only() {
        let big = fact(1, "notes", "bio", &"x".repeat(400)); // ~100 tokens
        let small = fact(2, "location", "city", "Philadelphia");
        let snapshot = Snapshot {
            facts: vec![big, small],
            messages: vec![],
            preferences: vec![],
        };
        let bundle = build_context("unrelated", &snapshot, &policy(20));
        // The big slice does not fit; the small one still packs.
        assert_eq!(bundle.slices.len(), 1);
        assert_eq!(bundle.slices[0].id, "fact:2");
        assert!(bundle.total_tokens <= 20);
    }

    #[test]
    fn test_relevant_fact_outranks_unrelated() {
        let snapshot = Snapshot {
            facts: vec![
                fact(1, "food", "favorite", "ramen"),
                fact(2, "location", "city", "Philadelphia"),
            ],
            messages: vec![],
            preferences: vec![],
        };
        let bundle = build_context("travel to philadelphia", &snapshot, &policy(500));
        assert_eq!(bundle.slices[0].id, "fact:2");
    }

    #[test]
    fn test_priority_breaks_relevance_ties() {
        let mut boosted = fact(1, "food", "favorite", "ramen");
        boosted.priority = 5.0;
        let snapshot = Snapshot {
            facts: vec![fact(2, "music", "genre", "jazz"), boosted],
            messages: vec![],
            preferences: vec![],
        };
        let bundle = build_context("unrelated goal", &snapshot, &policy(500));
        assert_eq!(bundle.slices[0].id, "fact:1");
    }

    #[test]
    fn test_empty_candidates_valid_bundle() {
        let bundle = build_context("anything", &Snapshot::default(), &policy(500));
        assert!(bundle.slices.is_empty());
        assert_eq!(bundle.total_tokens, 0);
        assert_eq!(bundle.hash.len(), 64);
        assert_eq!(bundle.selector_version, SELECTOR_VERSION);
    }

    #[test]
    fn test_preferences_and_messages_become_slices() {
        let snapshot = Snapshot {
            facts: vec![],
            messages: vec![Message {
                id: 7,
                session_id: "s1".into(),
                role: Role::Assistant,
                content: "noted".into(),
                created_at: "2026-01-01T00:00:00.000000Z".into(),
            }],
            preferences: vec![Preference {
                key: "tone".into(),
                value: "casual".into(),
                scope: crate::db::PrefScope::Explicit,
                updated_at: "2026-01-01T00:00:00.000000Z".into(),
            }],
        };
        let bundle = build_context("anything", &snapshot, &policy(500));
        let ids: Vec<&str> = bundle.slices.iter().map(|s| s.id.as_str()).collect();
        assert!(ids.contains(&"msg:7"));
        assert!(ids.contains(&"pref:tone"));
    }
}
