// tests/vault_contract.rs
// End-to-end contract tests: the properties collaborators rely on

use memvault::crypto::FieldKey;
use memvault::db::{ConsentScope, FactFilter, FactInput, META_MIGRATION_COMPLETE, Vault};
use memvault::ipc::rate_limit::RateLimiter;
use memvault::ipc::{BoundaryRequest, VaultServer};
use memvault::keys::{self, KeyManager};
use memvault::migration::migrate_legacy;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;

fn boundary(vault: Arc<Vault>) -> VaultServer {
    VaultServer::with_limiter(vault, RateLimiter::new(10_000))
}

fn call(server: &VaultServer, op: &str, params: Value) -> memvault::ipc::BoundaryResponse {
    server.handle(BoundaryRequest {
        id: "t".into(),
        op: op.into(),
        params,
    })
}

fn seed_legacy(dir: &Path) {
    std::fs::write(dir.join("profile.json"), r#"{"name": "Colin"}"#).unwrap();
    std::fs::write(
        dir.join("facts.json"),
        r#"{"location": {"city": "Philadelphia"}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("sessions.json"),
        r#"{"s1": {"title": "Weather", "goal": "check forecast",
                   "started_at": "2026-01-01T00:00:00.000000Z"}}"#,
    )
    .unwrap();
    std::fs::write(
        dir.join("messages.json"),
        r#"{"m1": {"session_id": "s1", "role": "user", "content": "is it raining?",
                   "timestamp": "2026-01-01T00:00:01.000000Z"}}"#,
    )
    .unwrap();
    std::fs::write(dir.join("preferences.json"), r#"{"units": "celsius"}"#).unwrap();
}

/// The city fact is selected for a weather goal; the never-upload name
/// fact is excluded no matter what.
#[test]
fn weather_scenario_consent_and_selection() {
    let vault = Arc::new(Vault::open_in_memory(FieldKey::generate()).unwrap());
    let server = boundary(vault.clone());

    let resp = call(
        &server,
        "set_fact",
        json!({"category": "location", "predicate": "city", "value": "Philadelphia",
               "pii_level": 1}),
    );
    assert!(resp.ok);

    let resp = call(
        &server,
        "set_fact",
        json!({"category": "personal", "predicate": "name", "value": "Colin",
               "pii_level": 1, "consent_scope": "never_upload"}),
    );
    assert!(resp.ok);

    let resp = call(
        &server,
        "build_context",
        json!({"goal": "what's the weather like", "token_budget": 500}),
    );
    assert!(resp.ok);
    let data = resp.data.unwrap();
    let texts: Vec<&str> = data["slices"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["text"].as_str().unwrap())
        .collect();
    assert!(texts.iter().any(|t| t.contains("Philadelphia")));
    assert!(!texts.iter().any(|t| t.contains("Colin")));
}

/// Two identical calls produce identical slices and identical hash.
#[test]
fn build_context_is_deterministic() {
    let vault = Arc::new(Vault::open_in_memory(FieldKey::generate()).unwrap());
    let server = boundary(vault.clone());

    for i in 0..6 {
        call(
            &server,
            "set_fact",
            json!({"category": "cat", "predicate": format!("p{i}"), "value": format!("value {i}")}),
        );
    }
    vault.add_message("s1", memvault::db::Role::User, "hello").unwrap();

    let params = json!({"goal": "value", "token_budget": 200});
    let a = call(&server, "build_context", params.clone()).data.unwrap();
    let b = call(&server, "build_context", params).data.unwrap();

    assert_eq!(a["meta"]["hash"], b["meta"]["hash"]);
    assert_eq!(a["slices"], b["slices"]);
}

/// An interrupted migration (transaction never committed) leaves the
/// vault fully rolled back; a rerun then migrates fully. Never a hybrid.
#[test]
fn migration_crash_drill() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_dir = dir.path().join("legacy");
    std::fs::create_dir(&legacy_dir).unwrap();
    seed_legacy(&legacy_dir);
    let vault_path = dir.path().join("vault.db");
    let key = FieldKey::generate();

    // Create the vault schema, then simulate a process kill mid-import:
    // rows written inside a transaction that never commits.
    {
        let vault = Vault::open(&vault_path, key.clone()).unwrap();
        drop(vault);

        let conn = rusqlite::Connection::open(&vault_path).unwrap();
        conn.execute_batch("BEGIN IMMEDIATE").unwrap();
        conn.execute(
            "INSERT INTO facts (category, predicate, object, created_at, updated_at)
             VALUES ('partial', 'row', 'blob', 'now', 'now')",
            [],
        )
        .unwrap();
        // Connection dropped without COMMIT — same as a kill -9.
    }

    // Fully rolled back: no facts, no completion flag.
    {
        let vault = Vault::open(&vault_path, key.clone()).unwrap();
        assert_eq!(vault.stats().unwrap().facts, 0);
        assert_eq!(vault.get_meta(META_MIGRATION_COMPLETE).unwrap(), None);
    }

    // Rerun migrates everything.
    let report = migrate_legacy(&legacy_dir, &vault_path, key.clone()).unwrap();
    assert_eq!(report.facts, 2);
    assert_eq!(report.messages, 1);

    let vault = Vault::open(&vault_path, key).unwrap();
    assert_eq!(
        vault.get_meta(META_MIGRATION_COMPLETE).unwrap(),
        Some("1".into())
    );
    assert_eq!(vault.stats().unwrap().facts, 2);
}

/// A failing migration destroys the partial vault and leaves the legacy
/// files intact and restorable.
#[test]
fn migration_failure_leaves_legacy_intact() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_dir = dir.path().join("legacy");
    std::fs::create_dir(&legacy_dir).unwrap();
    seed_legacy(&legacy_dir);
    // Poison the messages file with a role the schema refuses
    std::fs::write(
        legacy_dir.join("messages.json"),
        r#"{"m1": {"session_id": "s1", "role": "oracle", "content": "?"}}"#,
    )
    .unwrap();
    let vault_path = dir.path().join("vault.db");

    let err = migrate_legacy(&legacy_dir, &vault_path, FieldKey::generate()).unwrap_err();
    assert_eq!(err.code(), "MIGRATION");
    assert!(!vault_path.exists());

    let profile = std::fs::read_to_string(legacy_dir.join("profile.json")).unwrap();
    assert!(profile.contains("Colin"));
}

/// Reinforcing the same bundle twice in rapid succession boosts each
/// fact once, not twice.
#[test]
fn reinforcement_is_idempotent_per_goal() {
    let vault = Arc::new(Vault::open_in_memory(FieldKey::generate()).unwrap());
    let server = boundary(vault.clone());

    call(
        &server,
        "set_fact",
        json!({"category": "location", "predicate": "city", "value": "Philadelphia"}),
    );
    call(
        &server,
        "set_fact",
        json!({"category": "food", "predicate": "favorite", "value": "ramen"}),
    );

    let ids = json!({"fact_ids": ["fact:1", "fact:2"]});
    let first = call(&server, "reinforce", ids.clone()).data.unwrap();
    assert_eq!(first["applied"], 2);
    let second = call(&server, "reinforce", ids).data.unwrap();
    assert_eq!(second["applied"], 0);

    for fact in vault.get_facts(&FactFilter::default()).unwrap() {
        assert_eq!(fact.usage_count, 1, "fact {} double-counted", fact.id);
    }
}

/// Rotation re-encrypts everything; the rotated vault opens with the new
/// key and refuses the old one.
#[test]
fn key_rotation_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let vault_path = dir.path().join("vault.db");
    let manager = KeyManager::ephemeral();
    let old_key = manager.retrieve_key().unwrap();

    {
        let vault = Vault::open(&vault_path, old_key.clone()).unwrap();
        vault
            .set_fact(&FactInput {
                category: "location".into(),
                predicate: "city".into(),
                object: "Philadelphia".into(),
                confidence: 1.0,
                pii_level: 1,
                consent_scope: ConsentScope::Default,
            })
            .unwrap();
        keys::rotate_key(&vault, &manager).unwrap();
        // Live handle keeps working after rotation
        let facts = vault.get_facts(&FactFilter::default()).unwrap();
        assert_eq!(facts[0].object, "Philadelphia");
    }

    // Old key is now refused; the credential store has the working key.
    assert!(Vault::open(&vault_path, old_key).is_err());
    let new_key = manager.retrieve_key().unwrap();
    let vault = Vault::open(&vault_path, new_key).unwrap();
    assert_eq!(
        vault.get_facts(&FactFilter::default()).unwrap()[0].object,
        "Philadelphia"
    );
}

/// Health reports migration state and selector version after a real
/// migration.
#[test]
fn health_after_migration() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_dir = dir.path().join("legacy");
    std::fs::create_dir(&legacy_dir).unwrap();
    seed_legacy(&legacy_dir);
    let vault_path = dir.path().join("vault.db");
    let key = FieldKey::generate();

    migrate_legacy(&legacy_dir, &vault_path, key.clone()).unwrap();

    let vault = Arc::new(Vault::open(&vault_path, key).unwrap());
    let server = boundary(vault);
    let data = call(&server, "health", Value::Null).data.unwrap();
    assert_eq!(data["meta"]["migration_complete"], true);
    assert_eq!(data["meta"]["selector_version"], "v1");
    assert_eq!(data["stats"]["facts"], 2);
    assert_eq!(data["stats"]["sessions"], 1);
    assert_eq!(data["stats"]["preferences"], 1);
}

/// Migrated sessions are findable by full-text search on title/goal, and
/// message content never leaks into that index.
#[test]
fn session_search_after_migration() {
    let dir = tempfile::tempdir().unwrap();
    let legacy_dir = dir.path().join("legacy");
    std::fs::create_dir(&legacy_dir).unwrap();
    seed_legacy(&legacy_dir);
    let vault_path = dir.path().join("vault.db");
    let key = FieldKey::generate();

    migrate_legacy(&legacy_dir, &vault_path, key.clone()).unwrap();
    let vault = Vault::open(&vault_path, key).unwrap();

    let hits = vault.search_sessions("forecast", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "s1");

    // "raining" lives only inside encrypted message content
    assert!(vault.search_sessions("raining", 10).unwrap().is_empty());
    assert_eq!(vault.search_messages("raining", 10).unwrap().len(), 1);
}
