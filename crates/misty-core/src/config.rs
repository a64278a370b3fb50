//! Configuration system for misty.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $MISTY_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/misty/config.toml
//!   3. ~/.config/misty/config.toml

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MistyConfig {
    pub network: NetworkConfig,
    pub overlay: OverlayConfig,
    pub identity: IdentityPaths,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port the HTTP API binds on 127.0.0.1.
    pub api_port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    /// State directory handed to the overlay client. Created 0700 at startup.
    pub data_dir: PathBuf,
    pub tailscale_bin: PathBuf,
    pub tailscaled_bin: PathBuf,
}

/// Where the identity document and the shared secret live.
/// Both files are read-only to misty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityPaths {
    pub config_path: PathBuf,
    pub secret_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Deadline for a single reachability probe.
    pub timeout_secs: u64,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { api_port: 3000 }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            data_dir: dirs_or_home().join(".misty").join("tailscale"),
            tailscale_bin: PathBuf::from("tailscale"),
            tailscaled_bin: PathBuf::from("tailscaled"),
        }
    }
}

impl Default for IdentityPaths {
    fn default() -> Self {
        let base = dirs_or_home().join("misty").join("minidfs").join("tailscale");
        Self {
            config_path: base.join("config.json"),
            secret_path: base.join("secret.txt"),
        }
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self { timeout_secs: 5 }
    }
}

impl ProbeConfig {
    /// Probe deadline. A zero value in the file is raised to one second.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| dirs_or_home().join(".config"))
        .join("misty")
}

fn dirs_or_home() -> PathBuf {
    std::env::var("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {0}: {1}")]
    ReadFailed(PathBuf, std::io::Error),
    #[error("failed to parse {0}: {1}")]
    ParseFailed(PathBuf, toml::de::Error),
    #[error("failed to decode {0}: {1}")]
    DecodeFailed(PathBuf, serde_json::Error),
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl MistyConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            MistyConfig::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("MISTY_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| config_dir().join("config.toml"))
    }

    /// Write default config if none exists. Returns the path.
    pub fn write_default_if_missing() -> Result<PathBuf, ConfigError> {
        let path = Self::file_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
            }
            let text = toml::to_string_pretty(&MistyConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// Apply MISTY_* overrides. `lookup` is `std::env::var` outside of tests.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("MISTY_NETWORK__API_PORT") {
            if let Ok(p) = v.parse() {
                self.network.api_port = p;
            }
        }
        if let Some(v) = lookup("MISTY_OVERLAY__DATA_DIR") {
            self.overlay.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("MISTY_IDENTITY__CONFIG_PATH") {
            self.identity.config_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MISTY_IDENTITY__SECRET_PATH") {
            self.identity.secret_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("MISTY_PROBE__TIMEOUT_SECS") {
            match v.parse::<u64>() {
                Ok(s) if s > 0 => self.probe.timeout_secs = s,
                _ => {}
            }
        }
    }
}
