//! Unix socket and runtime-file paths for the daemon.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tokio::net::UnixListener;

/// Get the daemon socket path.
/// `~/.local/state/murmur/daemon.sock`
pub fn socket_path() -> Result<PathBuf> {
    murmur_common::dirs::socket_path()
}

/// Get the daemon PID file path.
/// `~/.local/state/murmur/daemon.pid`
pub fn pid_path() -> Result<PathBuf> {
    Ok(murmur_common::dirs::state_dir()?.join("daemon.pid"))
}

/// Get the daemon log file path.
/// `~/.local/state/murmur/daemon.log`
pub fn log_path() -> Result<PathBuf> {
    Ok(murmur_common::dirs::state_dir()?.join("daemon.log"))
}

/// Create a Unix listener, removing stale socket if present.
pub fn create_listener(path: &Path) -> Result<UnixListener> {
    // Remove existing socket if present
    if path.exists() {
        std::fs::remove_file(path).context("Failed to remove existing socket")?;
    }

    UnixListener::bind(path).context("Failed to bind Unix socket")
}

/// Remove the socket file.
pub fn cleanup_socket(path: &Path) {
    let _ = std::fs::remove_file(path);
}

#[cfg(test)]
#[path = "socket_test.rs"]
mod tests;
