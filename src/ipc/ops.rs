// src/ipc/ops.rs
// Boundary operation implementations: validate, sanitize, dispatch

use super::protocol::{
    BoundaryRequest, BoundaryResponse, BuildContextParams, ReinforceParams, SetFactParams, VaultOp,
};
use super::rate_limit::RateLimiter;
use crate::db::{FactInput, PII_MAX, Vault};
use crate::error::{Result, VaultError};
use crate::legacy::LegacyFallback;
use crate::selector::{
    self, DEFAULT_MAX_PII, SelectionPolicy, Snapshot, TOKEN_BUDGET_CEILING,
};
use regex::Regex;
use serde_json::{Value, json};
use std::sync::{Arc, LazyLock};

/// Length caps applied before anything reaches storage.
const MAX_IDENT_LEN: usize = 64;
const MAX_FACT_VALUE_LEN: usize = 4000;
const MAX_GOAL_LEN: usize = 2000;
const MAX_SLICE_ID_LEN: usize = 64;

static MARKUP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<[^>]*>").expect("markup regex is valid"));

/// What the boundary is serving: the real vault, or the legacy in-memory
/// snapshot when the kill switch engaged. In fallback mode only reads
/// work; every write is refused as unavailable.
pub enum Backend {
    Live(Arc<Vault>),
    Legacy(Arc<LegacyFallback>),
}

/// The only doorway from the untrusted UI process into the vault. Owns
/// an explicit vault handle — there is no global instance to reach
/// around it.
pub struct VaultServer {
    backend: Backend,
    limiter: RateLimiter,
}

impl VaultServer {
    pub fn new(vault: Arc<Vault>) -> Self {
        Self {
            backend: Backend::Live(vault),
            limiter: RateLimiter::default(),
        }
    }

    pub fn with_fallback(fallback: Arc<LegacyFallback>) -> Self {
        Self {
            backend: Backend::Legacy(fallback),
            limiter: RateLimiter::default(),
        }
    }

    /// Server with a non-default rate limit (tests, embedded callers).
    pub fn with_limiter(vault: Arc<Vault>, limiter: RateLimiter) -> Self {
        Self {
            backend: Backend::Live(vault),
            limiter,
        }
    }

    /// Handle one request end to end. Every outcome is a tagged response;
    /// errors cross the boundary as short codes only.
    pub fn handle(&self, request: BoundaryRequest) -> BoundaryResponse {
        let op = match VaultOp::parse(&request.op, request.params) {
            Ok(op) => op,
            Err(e) => return BoundaryResponse::failure(request.id, e.code()),
        };

        if let Err(e) = self.limiter.check(op.name()) {
            return BoundaryResponse::failure(request.id, e.code());
        }

        match self.dispatch(op) {
            Ok(data) => BoundaryResponse::success(request.id, data),
            Err(e) => {
                // Full detail stays on this side of the boundary.
                tracing::debug!("boundary op failed: {e}");
                BoundaryResponse::failure(request.id, e.code())
            }
        }
    }

    fn dispatch(&self, op: VaultOp) -> Result<Value> {
        match op {
            VaultOp::SetFact(params) => self.set_fact(params),
            VaultOp::BuildContext(params) => self.build_context(params),
            VaultOp::Reinforce(params) => self.reinforce(params),
            VaultOp::Health => self.health(),
        }
    }

    fn live(&self) -> Result<&Arc<Vault>> {
        match &self.backend {
            Backend::Live(vault) => Ok(vault),
            Backend::Legacy(_) => Err(VaultError::StorageUnavailable(
                "vault is in legacy fallback mode".into(),
            )),
        }
    }

    fn set_fact(&self, params: SetFactParams) -> Result<Value> {
        let vault = self.live()?;

        let category = validate_identifier("category", &params.category)?;
        let predicate = validate_identifier("predicate", &params.predicate)?;
        let object = sanitize_text(&params.value, MAX_FACT_VALUE_LEN);
        if object.is_empty() {
            return Err(VaultError::Validation("value is empty after sanitizing".into()));
        }
        if !(0.0..=1.0).contains(&params.confidence) {
            return Err(VaultError::Validation("confidence must be in [0, 1]".into()));
        }
        check_pii_ceiling(params.pii_level, params.elevated_trust)?;

        let id = vault.set_fact(&FactInput {
            category,
            predicate,
            object,
            confidence: params.confidence,
            pii_level: params.pii_level,
            consent_scope: params.consent_scope,
        })?;
        Ok(json!({ "fact_id": format!("fact:{id}") }))
    }

    fn build_context(&self, params: BuildContextParams) -> Result<Value> {
        let goal = sanitize_text(&params.goal, MAX_GOAL_LEN);
        if goal.is_empty() {
            return Err(VaultError::Validation("goal is empty after sanitizing".into()));
        }
        if params.token_budget == 0 {
            return Err(VaultError::Validation("token_budget must be positive".into()));
        }
        let max_pii = params.max_pii.unwrap_or(DEFAULT_MAX_PII);
        check_pii_ceiling(max_pii, params.elevated_trust)?;

        let policy = SelectionPolicy {
            max_pii,
            token_budget: params.token_budget.min(TOKEN_BUDGET_CEILING),
        };

        let bundle = match &self.backend {
            Backend::Live(vault) => {
                let snapshot = Snapshot::collect(vault)?;
                selector::build_context(&goal, &snapshot, &policy)
            }
            Backend::Legacy(fallback) => {
                selector::build_context(&goal, fallback.snapshot(), &policy)
            }
        };

        Ok(json!({
            "slices": bundle.slices,
            "meta": {
                "selector_version": bundle.selector_version,
                "hash": bundle.hash,
                "total_tokens": bundle.total_tokens,
            },
        }))
    }

    fn reinforce(&self, params: ReinforceParams) -> Result<Value> {
        let vault = self.live()?;
        for id in &params.fact_ids {
            if id.is_empty() || id.len() > MAX_SLICE_ID_LEN {
                return Err(VaultError::Validation("malformed slice id".into()));
            }
        }
        let report = crate::reinforce::reinforce(vault, &params.fact_ids)?;
        Ok(json!(report))
    }

    fn health(&self) -> Result<Value> {
        match &self.backend {
            Backend::Live(vault) => {
                let stats = vault.stats()?;
                let meta = vault.get_all_meta()?;
                Ok(json!({
                    "stats": stats,
                    "meta": {
                        "schema_version": meta.get(crate::db::META_SCHEMA_VERSION),
                        "migration_complete":
                            meta.get(crate::db::META_MIGRATION_COMPLETE).map(|v| v == "1").unwrap_or(false),
                        "selector_version": meta.get(crate::db::META_SELECTOR_VERSION),
                        "integrity_check": meta.get(crate::db::META_INTEGRITY_CHECK),
                        "fallback": false,
                    },
                }))
            }
            Backend::Legacy(fallback) => Ok(json!({
                "stats": fallback.stats(),
                "meta": {
                    "selector_version": selector::SELECTOR_VERSION,
                    "fallback": true,
                },
            })),
        }
    }
}

/// Reject PII tiers beyond the default ceiling unless the caller holds
/// the elevated-trust flag; tiers beyond the scale are always rejected.
fn check_pii_ceiling(pii_level: u8, elevated_trust: bool) -> Result<()> {
    if pii_level > PII_MAX {
        return Err(VaultError::Validation(format!(
            "pii_level {pii_level} out of range"
        )));
    }
    if pii_level > DEFAULT_MAX_PII && !elevated_trust {
        return Err(VaultError::Validation(
            "pii_level above ceiling requires elevated trust".into(),
        ));
    }
    Ok(())
}

/// Identifier fields (category, predicate): short, lowercase-ish tokens.
fn validate_identifier(what: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(VaultError::Validation(format!("{what} is empty")));
    }
    if value.len() > MAX_IDENT_LEN {
        return Err(VaultError::Validation(format!("{what} is too long")));
    }
    if !value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
    {
        return Err(VaultError::Validation(format!(
            "{what} has invalid characters"
        )));
    }
    Ok(value.to_string())
}

/// Strip markup and control characters, collapse whitespace, cap length.
fn sanitize_text(input: &str, max_chars: usize) -> String {
    let stripped = MARKUP.replace_all(input, " ");
    let cleaned: String = stripped.chars().filter(|c| !c.is_control()).collect();
    let collapsed = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    collapsed.chars().take(max_chars).collect()
}
