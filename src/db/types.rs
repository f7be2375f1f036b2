// src/db/types.rs
// Row types for the vault storage engine

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

/// Current UTC timestamp as RFC 3339 with fixed microsecond precision.
///
/// Fixed precision keeps lexicographic comparison of stored timestamps
/// equivalent to chronological comparison.
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Policy tag controlling whether a fact may ever leave the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsentScope {
    #[default]
    Default,
    NeverUpload,
}

impl ConsentScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsentScope::Default => "default",
            ConsentScope::NeverUpload => "never_upload",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "default" => Some(ConsentScope::Default),
            "never_upload" => Some(ConsentScope::NeverUpload),
            _ => None,
        }
    }
}

/// Highest PII tier a fact may carry (0=public, 1=personal, 2=sensitive).
pub const PII_MAX: u8 = 2;

/// A subject/predicate/object style triple about the user.
/// `object` is plaintext here; the engine encrypts it at rest.
#[derive(Debug, Clone, Serialize)]
pub struct Fact {
    pub id: i64,
    pub category: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub pii_level: u8,
    pub consent_scope: ConsentScope,
    pub priority: f64,
    pub usage_count: i64,
    pub last_reinforced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Input for `set_fact` upserts.
#[derive(Debug, Clone)]
pub struct FactInput {
    pub category: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    pub pii_level: u8,
    pub consent_scope: ConsentScope,
}

/// Filter for `get_facts`. Empty filter returns everything.
#[derive(Debug, Clone, Default)]
pub struct FactFilter {
    pub category: Option<String>,
    pub max_pii: Option<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One conversation turn. Immutable once written; `content` is encrypted
/// at rest.
#[derive(Debug, Clone, Serialize)]
pub struct Message {
    pub id: i64,
    pub session_id: String,
    pub role: Role,
    pub content: String,
    pub created_at: String,
}

/// One conversation thread. Title and goal stay plaintext — they are the
/// only columns the full-text index is allowed to see.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub id: String,
    pub title: String,
    pub goal: String,
    pub started_at: String,
    pub message_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefScope {
    #[default]
    Explicit,
    Implicit,
}

impl PrefScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrefScope::Explicit => "explicit",
            PrefScope::Implicit => "implicit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "explicit" => Some(PrefScope::Explicit),
            "implicit" => Some(PrefScope::Implicit),
            _ => None,
        }
    }
}

/// A user preference. `value` is encrypted at rest.
#[derive(Debug, Clone, Serialize)]
pub struct Preference {
    pub key: String,
    pub value: String,
    pub scope: PrefScope,
    pub updated_at: String,
}

/// Row counts reported by `health`.
#[derive(Debug, Clone, Serialize)]
pub struct VaultStats {
    pub facts: i64,
    pub messages: i64,
    pub sessions: i64,
    pub preferences: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_scope_round_trip() {
        for scope in [ConsentScope::Default, ConsentScope::NeverUpload] {
            assert_eq!(ConsentScope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(ConsentScope::parse("upload_everything"), None);
    }

    #[test]
    fn test_role_round_trip() {
        for role in [Role::User, Role::Assistant] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("system"), None);
    }

    #[test]
    fn test_now_rfc3339_fixed_precision_sorts() {
        let a = now_rfc3339();
        let b = now_rfc3339();
        // Fixed-width timestamps: lexicographic order == chronological order
        assert_eq!(a.len(), b.len());
        assert!(a <= b);
    }
}
