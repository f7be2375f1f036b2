// src/ipc/mod.rs
// The message boundary: the only way the UI process reaches the vault

pub mod handler;
pub mod ops;
pub mod protocol;
pub mod rate_limit;

pub use ops::{Backend, VaultServer};
pub use protocol::{BoundaryRequest, BoundaryResponse};

use std::path::PathBuf;
use std::sync::Arc;

/// Returns the path to the vault IPC socket (~/.memvault/memvault.sock).
///
/// Fallback when HOME is unset: prefers `$XDG_RUNTIME_DIR` (per-user,
/// 0700) over `/tmp`. If `/tmp` is used, the path includes the UID to
/// prevent socket impersonation on shared systems.
#[cfg(unix)]
pub fn socket_path() -> PathBuf {
    if let Some(home) = dirs::home_dir() {
        return home.join(".memvault").join("memvault.sock");
    }

    tracing::warn!("HOME directory not set — using fallback for vault IPC socket");

    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("memvault").join("memvault.sock");
    }

    let uid = unsafe { libc::getuid() };
    PathBuf::from(format!("/tmp/memvault-{uid}")).join("memvault.sock")
}

/// Start the IPC listener on a Unix domain socket.
#[cfg(unix)]
pub async fn run_ipc_listener(server: Arc<VaultServer>) -> anyhow::Result<()> {
    use tracing::info;

    let path = socket_path();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Remove stale socket from previous run
    if path.exists() {
        std::fs::remove_file(&path)?;
    }

    // Restrictive umask before bind so the socket is created owner-only.
    // This closes the TOCTOU race between bind and set_permissions.
    let old_umask = unsafe { libc::umask(0o177) };
    let bind_result = tokio::net::UnixListener::bind(&path);
    unsafe { libc::umask(old_umask) };
    let listener = bind_result?;

    info!("vault IPC listener started on {}", path.display());

    let semaphore = Arc::new(tokio::sync::Semaphore::new(16));

    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let permit = match semaphore.clone().try_acquire_owned() {
                    Ok(permit) => permit,
                    Err(_) => {
                        // At capacity: drop the connection rather than
                        // queue. The UI retries; the vault never backs up.
                        tracing::warn!("IPC connection limit reached, rejecting connection");
                        continue;
                    }
                };
                let server = server.clone();
                tokio::spawn(async move {
                    handler::handle_connection(stream, server).await;
                    drop(permit);
                });
            }
            Err(e) => {
                tracing::warn!("IPC accept failed: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    #[cfg(unix)]
    #[test]
    fn test_socket_path_is_absolute() {
        let path = super::socket_path();
        assert!(path.is_absolute());
        assert!(path.to_string_lossy().contains("memvault"));
    }
}
