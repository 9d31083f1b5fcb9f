//! Configuration loading and management

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

const DEFAULT_TCP_ADDR: &str = "127.0.0.1:47321";

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Loopback address for IPC where Unix sockets are unavailable
    pub tcp_addr: SocketAddr,

    /// Directory for runtime data and the UI's settings file
    pub data_dir: PathBuf,

    /// Shortcut to arm at startup, if any
    pub shortcut: Option<String>,
}

/// The part of the UI-owned settings file this daemon reads
#[derive(Debug, Default, Deserialize)]
struct Settings {
    #[serde(default)]
    hotkey: Option<String>,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        let data_dir = match std::env::var_os("KEYCHORD_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_data_dir()?,
        };

        let socket_path = data_dir.join("daemon.sock");

        let tcp_addr = std::env::var("KEYCHORD_TCP_ADDR")
            .unwrap_or_else(|_| DEFAULT_TCP_ADDR.to_string())
            .parse()
            .context("KEYCHORD_TCP_ADDR is not a valid socket address")?;

        let shortcut = match std::env::var("KEYCHORD_SHORTCUT") {
            Ok(s) if !s.trim().is_empty() => Some(s),
            _ => read_settings(&data_dir.join("settings.json")).hotkey,
        };

        Ok(Self {
            socket_path,
            tcp_addr,
            data_dir,
            shortcut,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)
            .with_context(|| format!("failed to create {}", self.data_dir.display()))?;
        Ok(())
    }
}

#[cfg(windows)]
fn default_data_dir() -> Result<PathBuf> {
    let app_data = std::env::var("APPDATA").context("APPDATA is not set")?;
    Ok(PathBuf::from(app_data).join("keychord"))
}

#[cfg(not(windows))]
fn default_data_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    Ok(PathBuf::from(home)
        .join(".local")
        .join("share")
        .join("keychord"))
}

/// Read the settings file; a missing or malformed file means no settings
fn read_settings(path: &Path) -> Settings {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) => {
            debug!(?path, %e, "no settings file");
            return Settings::default();
        }
    };
    serde_json::from_str(&raw).unwrap_or_else(|e| {
        warn!(?path, %e, "ignoring malformed settings file");
        Settings::default()
    })
}
