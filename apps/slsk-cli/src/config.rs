//! Loads the client configuration.
//!
//! Path: `$SLSK_CONFIG`, else `~/.config/slsk/config.json`. A missing file
//! means defaults. `SLSK_USERNAME` and `SLSK_PASSWORD` override the
//! credentials from the file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use slsk_client::ClientConfig;

pub fn load() -> anyhow::Result<ClientConfig> {
    let path = config_path();
    let mut config = load_from(&path)?;

    if let Ok(username) = std::env::var("SLSK_USERNAME") {
        config.username = username;
    }
    if let Ok(password) = std::env::var("SLSK_PASSWORD") {
        config.password = password;
    }
    Ok(config)
}

fn load_from(path: &Path) -> anyhow::Result<ClientConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no config file, using defaults");
        return Ok(ClientConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let config = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse {}", path.display()))?;
    tracing::debug!(path = %path.display(), "configuration loaded");
    Ok(config)
}

fn config_path() -> PathBuf {
    if let Ok(path) = std::env::var("SLSK_CONFIG") {
        return PathBuf::from(path);
    }
    config_base_dir().join("slsk").join("config.json")
}

fn config_base_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        let appdata =
            std::env::var("APPDATA").unwrap_or_else(|_| "C:\\Users\\Default\\AppData".into());
        PathBuf::from(appdata)
    }

    #[cfg(not(target_os = "windows"))]
    {
        let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());
        PathBuf::from(home).join(".config")
    }
}
