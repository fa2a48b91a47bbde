//! Path resolution for steward
//!
//! # Environment Variables
//!
//! - `STEWARD_STATE_DIR` - Override state directory
//!
//! # Path Resolution Priority
//!
//! For state_dir():
//! 1. `STEWARD_STATE_DIR` environment variable
//! 2. `XDG_STATE_HOME/steward` (if set)
//! 3. Platform default:
//!    - Windows: `%LOCALAPPDATA%\steward`
//!    - macOS/Linux: `~/.local/state/steward`

use anyhow::{Context, Result};
use std::path::PathBuf;

/// Environment variable for state directory override
pub const ENV_STATE_DIR: &str = "STEWARD_STATE_DIR";

/// File the transaction store is kept in, inside the state directory
pub const TRANSACTION_STORE: &str = "transactionstore.json";

/// Get the steward state directory path
pub fn state_dir() -> Result<PathBuf> {
    if let Ok(dir) = std::env::var(ENV_STATE_DIR) {
        let path = expand(&dir);
        log::debug!("Using state dir from {}: {}", ENV_STATE_DIR, path.display());
        return Ok(path);
    }

    if let Ok(xdg_state) = std::env::var("XDG_STATE_HOME") {
        let path = PathBuf::from(xdg_state).join("steward");
        log::debug!("Using XDG_STATE_HOME: {}", path.display());
        return Ok(path);
    }

    #[cfg(windows)]
    {
        if let Some(local_app_data) = dirs::data_local_dir() {
            let path = local_app_data.join("steward");
            log::debug!("Using Windows state dir: {}", path.display());
            return Ok(path);
        }
    }

    let home = dirs::home_dir().context("Could not determine home directory")?;
    let path = home.join(".local").join("state").join("steward");
    log::debug!("Using default state dir: {}", path.display());
    Ok(path)
}

/// Where the transaction store lives unless `--state-file` says otherwise
pub fn transaction_store() -> Result<PathBuf> {
    Ok(state_dir()?.join(TRANSACTION_STORE))
}

/// Expand ~ and environment variables in a path string
pub fn expand(path: &str) -> PathBuf {
    let expanded = shellexpand::full(path).unwrap_or(std::borrow::Cow::Borrowed(path));
    PathBuf::from(expanded.as_ref())
}
