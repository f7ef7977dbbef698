//! Home-based storage paths under `~/.tab-session/`:
//! - `config.yaml` - Session configuration
//! - `cookies.json` - Cookie jar shared by every tab
//! - `logs/monitoring.jsonl` - Monitoring messages

use anyhow::{Context, Result};
use std::fs;
use std::path::PathBuf;

const TAB_SESSION_DIR: &str = ".tab-session";

/// Returns `~/.tab-session/`, creating it if needed.
///
/// # Errors
///
/// Returns an error if:
/// - Home directory cannot be determined
/// - Directory creation fails
pub fn tab_session_home_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not determine home directory")?;
    let dir = home.join(TAB_SESSION_DIR);
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create directory: {}", dir.display()))?;
    Ok(dir)
}

pub fn config_path() -> Result<PathBuf> {
    Ok(tab_session_home_dir()?.join("config.yaml"))
}

pub fn cookie_jar_path() -> Result<PathBuf> {
    Ok(tab_session_home_dir()?.join("cookies.json"))
}

/// Returns `~/.tab-session/logs/`, creating it if needed.
pub fn logs_dir() -> Result<PathBuf> {
    let dir = tab_session_home_dir()?.join("logs");
    fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create logs directory: {}", dir.display()))?;
    Ok(dir)
}
