// src/main.rs
// memvault - encrypted local personalization store for the desktop assistant

use anyhow::Result;
use clap::{Parser, Subcommand};
use memvault::config::VaultConfig;
use memvault::db::Vault;
use memvault::ipc::VaultServer;
use memvault::keys::{self, KeyManager};
use memvault::legacy::LegacyFallback;
use memvault::migration::migrate_legacy;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "memvault")]
#[command(about = "Encrypted local personalization store for the desktop assistant")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the IPC server (default)
    Serve,

    /// Import the legacy JSON store into the vault
    Migrate {
        /// Legacy directory (default: <data dir>/legacy)
        #[arg(short, long)]
        legacy_dir: Option<PathBuf>,
    },

    /// Rotate the field encryption key, re-encrypting all stored rows
    RotateKey,

    /// Print vault health as JSON
    Health,
}

#[tokio::main]
async fn main() -> Result<()> {
    let level = std::env::var("MEMVAULT_LOG")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = VaultConfig::from_env();

    match cli.command {
        None | Some(Commands::Serve) => run_server(config).await,
        Some(Commands::Migrate { legacy_dir }) => run_migrate(config, legacy_dir),
        Some(Commands::RotateKey) => run_rotate_key(config),
        Some(Commands::Health) => run_health(config),
    }
}

/// Open the vault with the identity and key from the credential store.
fn open_vault(config: &VaultConfig, keys: &KeyManager) -> memvault::Result<Vault> {
    let identity = keys.get_or_create_identity()?;
    let key = keys.retrieve_key()?;
    let vault = Vault::open(&config.db_path(), key)?;
    vault.mirror_identity(&identity)?;
    Ok(vault)
}

async fn run_server(config: VaultConfig) -> Result<()> {
    let keys = KeyManager::system();
    let server = match open_vault(&config, &keys) {
        Ok(vault) => Arc::new(VaultServer::new(Arc::new(vault))),
        Err(e) if config.legacy_fallback => {
            // The kill switch trades persistence for availability; make
            // sure nobody can mistake this mode for a healthy vault.
            tracing::error!(
                "VAULT FAILED TO OPEN ({e}); kill switch active — serving read-only \
                 from legacy data, nothing will be persisted"
            );
            let fallback = LegacyFallback::load(&config.legacy_dir)?;
            Arc::new(VaultServer::with_fallback(Arc::new(fallback)))
        }
        Err(e) => return Err(e.into()),
    };

    #[cfg(unix)]
    {
        memvault::ipc::run_ipc_listener(server).await
    }
    #[cfg(not(unix))]
    {
        let _ = server;
        anyhow::bail!("the IPC server currently supports Unix platforms only")
    }
}

fn run_migrate(config: VaultConfig, legacy_dir: Option<PathBuf>) -> Result<()> {
    let keys = KeyManager::system();
    let key = keys.retrieve_key()?;
    let legacy_dir = legacy_dir.unwrap_or_else(|| config.legacy_dir.clone());

    let report = migrate_legacy(&legacy_dir, &config.db_path(), key)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn run_rotate_key(config: VaultConfig) -> Result<()> {
    let keys = KeyManager::system();
    let vault = open_vault(&config, &keys)?;
    keys::rotate_key(&vault, &keys)?;
    println!("key rotated");
    Ok(())
}

fn run_health(config: VaultConfig) -> Result<()> {
    let keys = KeyManager::system();
    let vault = open_vault(&config, &keys)?;
    let stats = vault.stats()?;
    let meta = vault.get_all_meta()?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "stats": stats,
            "meta": meta,
        }))?
    );
    Ok(())
}
