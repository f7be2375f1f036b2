// src/ipc/protocol.rs
// NDJSON protocol types for the UI-to-vault boundary

use crate::db::ConsentScope;
use crate::error::{Result, VaultError};
use serde::{Deserialize, Serialize};

/// Request envelope sent by the UI process.
///
/// Line-delimited JSON: one request line → one response line. `op` names
/// one of the closed set of operations; `params` is validated against
/// that operation's schema before anything touches storage.
#[derive(Debug, Deserialize)]
pub struct BoundaryRequest {
    /// Request ID for correlation
    pub id: String,
    /// Operation name (e.g. "build_context")
    pub op: String,
    /// Operation-specific parameters
    #[serde(default)]
    pub params: serde_json::Value,
}

fn default_confidence() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SetFactParams {
    pub category: String,
    pub predicate: String,
    pub value: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub pii_level: u8,
    #[serde(default)]
    pub consent_scope: ConsentScope,
    #[serde(default)]
    pub elevated_trust: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildContextParams {
    pub goal: String,
    pub token_budget: usize,
    #[serde(default)]
    pub max_pii: Option<u8>,
    #[serde(default)]
    pub elevated_trust: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReinforceParams {
    pub fact_ids: Vec<String>,
}

/// The closed set of operations reachable from outside the process.
/// Anything else is rejected at parse time.
#[derive(Debug)]
pub enum VaultOp {
    SetFact(SetFactParams),
    BuildContext(BuildContextParams),
    Reinforce(ReinforceParams),
    Health,
}

impl VaultOp {
    pub fn parse(op: &str, params: serde_json::Value) -> Result<Self> {
        let invalid = |e: serde_json::Error| VaultError::Validation(e.to_string());
        match op {
            "set_fact" => Ok(VaultOp::SetFact(
                serde_json::from_value(params).map_err(invalid)?,
            )),
            "build_context" => Ok(VaultOp::BuildContext(
                serde_json::from_value(params).map_err(invalid)?,
            )),
            "reinforce" => Ok(VaultOp::Reinforce(
                serde_json::from_value(params).map_err(invalid)?,
            )),
            "health" => {
                if params.is_null() || params.as_object().is_some_and(|o| o.is_empty()) {
                    Ok(VaultOp::Health)
                } else {
                    Err(VaultError::Validation("health takes no params".into()))
                }
            }
            other => Err(VaultError::Validation(format!("unknown operation '{other}'"))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            VaultOp::SetFact(_) => "set_fact",
            VaultOp::BuildContext(_) => "build_context",
            VaultOp::Reinforce(_) => "reinforce",
            VaultOp::Health => "health",
        }
    }
}

/// Response envelope. On failure `error` carries a short machine code
/// only — never a message, field name, or value.
#[derive(Debug, Serialize, Deserialize)]
pub struct BoundaryResponse {
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BoundaryResponse {
    pub fn success(id: String, data: serde_json::Value) -> Self {
        Self {
            id,
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: String, code: &str) -> Self {
        Self {
            id,
            ok: false,
            data: None,
            error: Some(code.to_string()),
        }
    }
}
