// src/config.rs
// Data-directory resolution and environment-driven settings

use std::path::PathBuf;

/// Runtime configuration for the vault process.
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Directory holding the vault database (default: ~/.memvault)
    pub data_dir: PathBuf,
    /// Directory holding the legacy per-entity JSON files
    pub legacy_dir: PathBuf,
    /// Kill switch: serve from the legacy store when the vault cannot
    /// open, instead of exiting. Off by default.
    pub legacy_fallback: bool,
}

impl VaultConfig {
    pub fn from_env() -> Self {
        let data_dir = std::env::var("MEMVAULT_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_data_dir());
        let legacy_dir = std::env::var("MEMVAULT_LEGACY_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("legacy"));
        let legacy_fallback = std::env::var("MEMVAULT_LEGACY_FALLBACK")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        Self {
            data_dir,
            legacy_dir,
            legacy_fallback,
        }
    }

    /// Path of the vault database file.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("vault.db")
    }
}

fn default_data_dir() -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".memvault")
}
