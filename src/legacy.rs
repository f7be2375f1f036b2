// src/legacy.rs
// Legacy per-entity JSON format: typed model, loading, and the in-memory
// fallback store used by the kill switch

use crate::db::{ConsentScope, Fact, FactInput, Message, PrefScope, Preference, Role, VaultStats};
use crate::error::{Result, VaultError};
use crate::selector::Snapshot;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;

pub const PROFILE_FILE: &str = "profile.json";
pub const FACTS_FILE: &str = "facts.json";
pub const SESSIONS_FILE: &str = "sessions.json";
pub const MESSAGES_FILE: &str = "messages.json";
pub const PREFERENCES_FILE: &str = "preferences.json";

/// Timestamp assigned to legacy rows that carry none of their own.
const LEGACY_EPOCH: &str = "1970-01-01T00:00:00.000000Z";

fn default_confidence() -> f64 {
    1.0
}

fn default_pii() -> u8 {
    1
}

/// A legacy fact value: either a bare string or an annotated object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyFactValue {
    Simple(String),
    Detailed {
        value: String,
        #[serde(default = "default_confidence")]
        confidence: f64,
        #[serde(default = "default_pii")]
        pii_level: u8,
        #[serde(default)]
        consent_scope: ConsentScope,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacySession {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub started_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LegacyMessage {
    pub session_id: String,
    pub role: String,
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum LegacyPrefValue {
    Simple(String),
    Detailed {
        value: String,
        #[serde(default)]
        scope: PrefScope,
    },
}

/// The legacy store as found on disk. Each field is `None` when its file
/// is absent — a typed absence, never a silently-defaulted empty map.
#[derive(Debug, Default)]
pub struct LegacyStore {
    pub profile: Option<BTreeMap<String, serde_json::Value>>,
    pub facts: Option<BTreeMap<String, BTreeMap<String, LegacyFactValue>>>,
    pub sessions: Option<BTreeMap<String, LegacySession>>,
    pub messages: Option<BTreeMap<String, LegacyMessage>>,
    pub preferences: Option<BTreeMap<String, LegacyPrefValue>>,
}

impl LegacyStore {
    /// Load the legacy directory. A missing file is fine; a malformed one
    /// is a `Migration` error — guessing at broken data would mask loss.
    pub fn load(dir: &Path) -> Result<Self> {
        Ok(Self {
            profile: read_entity(dir, PROFILE_FILE)?,
            facts: read_entity(dir, FACTS_FILE)?,
            sessions: read_entity(dir, SESSIONS_FILE)?,
            messages: read_entity(dir, MESSAGES_FILE)?,
            preferences: read_entity(dir, PREFERENCES_FILE)?,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_none()
            && self.facts.is_none()
            && self.sessions.is_none()
            && self.messages.is_none()
            && self.preferences.is_none()
    }

    /// Profile entries and legacy facts as fact inputs, in deterministic
    /// order (profile first, then facts by category/predicate).
    pub fn fact_inputs(&self) -> Vec<FactInput> {
        let mut inputs = Vec::new();

        if let Some(profile) = &self.profile {
            for (key, value) in profile {
                let object = match value {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                inputs.push(FactInput {
                    category: "profile".into(),
                    predicate: key.clone(),
                    object,
                    confidence: 1.0,
                    pii_level: 1,
                    consent_scope: ConsentScope::Default,
                });
            }
        }

        if let Some(facts) = &self.facts {
            for (category, entries) in facts {
                for (predicate, entry) in entries {
                    let input = match entry {
                        LegacyFactValue::Simple(value) => FactInput {
                            category: category.clone(),
                            predicate: predicate.clone(),
                            object: value.clone(),
                            confidence: 1.0,
                            pii_level: 1,
                            consent_scope: ConsentScope::Default,
                        },
                        LegacyFactValue::Detailed {
                            value,
                            confidence,
                            pii_level,
                            consent_scope,
                        } => FactInput {
                            category: category.clone(),
                            predicate: predicate.clone(),
                            object: value.clone(),
                            confidence: confidence.clamp(0.0, 1.0),
                            pii_level: (*pii_level).min(crate::db::PII_MAX),
                            consent_scope: *consent_scope,
                        },
                    };
                    inputs.push(input);
                }
            }
        }

        inputs
    }

    /// Sessions as (id, title, goal, started_at) rows.
    pub fn session_rows(&self) -> Vec<(String, String, String, String)> {
        let Some(sessions) = &self.sessions else {
            return Vec::new();
        };
        sessions
            .iter()
            .map(|(id, s)| {
                (
                    id.clone(),
                    s.title.clone(),
                    s.goal.clone(),
                    s.started_at.clone().unwrap_or_else(|| LEGACY_EPOCH.into()),
                )
            })
            .collect()
    }

    /// Messages as (session_id, role, content, created_at) rows, ordered
    /// by timestamp then id so insertion order is reproducible. An
    /// unknown role is a `Migration` error, not a silent default.
    pub fn message_rows(&self) -> Result<Vec<(String, Role, String, String)>> {
        let Some(messages) = &self.messages else {
            return Ok(Vec::new());
        };
        let mut keyed: Vec<(&String, &LegacyMessage)> = messages.iter().collect();
        keyed.sort_by(|(id_a, a), (id_b, b)| {
            let ts_a = a.timestamp.as_deref().unwrap_or(LEGACY_EPOCH);
            let ts_b = b.timestamp.as_deref().unwrap_or(LEGACY_EPOCH);
            ts_a.cmp(ts_b).then_with(|| id_a.cmp(id_b))
        });

        keyed
            .into_iter()
            .map(|(id, m)| {
                let role = Role::parse(&m.role).ok_or_else(|| {
                    VaultError::Migration(format!("message {id} has unknown role '{}'", m.role))
                })?;
                Ok((
                    m.session_id.clone(),
                    role,
                    m.content.clone(),
                    m.timestamp.clone().unwrap_or_else(|| LEGACY_EPOCH.into()),
                ))
            })
            .collect()
    }

    /// Preferences as (key, value, scope) rows.
    pub fn preference_rows(&self) -> Vec<(String, String, PrefScope)> {
        let Some(preferences) = &self.preferences else {
            return Vec::new();
        };
        preferences
            .iter()
            .map(|(key, entry)| match entry {
                LegacyPrefValue::Simple(value) => {
                    (key.clone(), value.clone(), PrefScope::Explicit)
                }
                LegacyPrefValue::Detailed { value, scope } => {
                    (key.clone(), value.clone(), *scope)
                }
            })
            .collect()
    }
}

fn read_entity<T: DeserializeOwned>(dir: &Path, file: &str) -> Result<Option<T>> {
    let path = dir.join(file);
    if !path.exists() {
        return Ok(None);
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| VaultError::Migration(format!("cannot read {file}: {e}")))?;
    serde_json::from_str(&text)
        .map(Some)
        .map_err(|e| VaultError::Migration(format!("malformed {file}: {e}")))
}

/// In-memory stand-in for the vault when the kill switch is active.
///
/// Loaded straight from the legacy files; serves context building and
/// health only. Writes are refused upstream — this exists so one corrupt
/// installation cannot brick the assistant, not as a second storage path.
pub struct LegacyFallback {
    snapshot: Snapshot,
}

impl LegacyFallback {
    pub fn load(dir: &Path) -> Result<Self> {
        let store = LegacyStore::load(dir)?;

        let facts = store
            .fact_inputs()
            .into_iter()
            .enumerate()
            .map(|(i, input)| Fact {
                id: i as i64 + 1,
                category: input.category,
                predicate: input.predicate,
                object: input.object,
                confidence: input.confidence,
                pii_level: input.pii_level,
                consent_scope: input.consent_scope,
                priority: 0.0,
                usage_count: 0,
                last_reinforced_at: None,
                created_at: LEGACY_EPOCH.into(),
                updated_at: LEGACY_EPOCH.into(),
            })
            .collect();

        let messages = store
            .message_rows()?
            .into_iter()
            .enumerate()
            .map(|(i, (session_id, role, content, created_at))| Message {
                id: i as i64 + 1,
                session_id,
                role,
                content,
                created_at,
            })
            .collect();

        let preferences = store
            .preference_rows()
            .into_iter()
            .map(|(key, value, scope)| Preference {
                key,
                value,
                scope,
                updated_at: LEGACY_EPOCH.into(),
            })
            .collect();

        Ok(Self {
            snapshot: Snapshot {
                facts,
                messages,
                preferences,
            },
        })
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn stats(&self) -> VaultStats {
        let sessions: std::collections::BTreeSet<&str> = self
            .snapshot
            .messages
            .iter()
            .map(|m| m.session_id.as_str())
            .collect();
        VaultStats {
            facts: self.snapshot.facts.len() as i64,
            messages: self.snapshot.messages.len() as i64,
            sessions: sessions.len() as i64,
            preferences: self.snapshot.preferences.len() as i64,
        }
    }
}
