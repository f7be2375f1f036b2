// src/error.rs
// Standardized error types for the vault

use thiserror::Error;

/// Main error type for the vault library
#[derive(Error, Debug)]
pub enum VaultError {
    #[error("invalid input: {0}")]
    Validation(String),

    #[error("field decryption failed: {0}")]
    Decryption(String),

    #[error("migration failed: {0}")]
    Migration(String),

    #[error("rate limit exceeded for operation '{0}'")]
    RateLimited(String),

    #[error("vault unavailable: {0}")]
    StorageUnavailable(String),

    #[error("database error: {0}")]
    Db(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unknown error: {0}")]
    Other(String),
}

/// Convenience type alias for Result using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

impl VaultError {
    /// Short machine-readable code for the IPC boundary.
    ///
    /// This is the only error detail that crosses the process boundary;
    /// field names, key material, and SQL text stay inside.
    pub fn code(&self) -> &'static str {
        match self {
            VaultError::Validation(_) => "VALIDATION",
            VaultError::Decryption(_) => "DECRYPTION",
            VaultError::Migration(_) => "MIGRATION",
            VaultError::RateLimited(_) => "RATE_LIMITED",
            VaultError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
            VaultError::Db(_) | VaultError::Io(_) | VaultError::Json(_) | VaultError::Other(_) => {
                "INTERNAL"
            }
        }
    }
}

impl From<String> for VaultError {
    fn from(s: String) -> Self {
        VaultError::Other(s)
    }
}
