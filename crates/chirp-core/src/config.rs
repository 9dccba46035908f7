//! Configuration system for CHIRP.
//!
//! Resolution order: environment variables → config file → defaults.
//!
//! Config file location:
//!   1. $CHIRP_CONFIG (explicit override)
//!   2. $XDG_CONFIG_HOME/chirp/config.toml
//!   3. ~/.config/chirp/config.toml

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::wire::CHIRP_PORT;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChirpConfig {
    pub identity: IdentityConfig,
    pub network: NetworkConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Group this peer belongs to. Peers only see each other within a group.
    pub group: String,
    /// Name of this peer. Must be unique within the group, or
    /// self-suppression will silently drop another peer's messages.
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address outbound discovery datagrams are sent to.
    pub broadcast_addr: IpAddr,
    /// Address the receiver listens on.
    pub bind_addr: IpAddr,
    /// UDP port used for both send and receive.
    pub port: u16,
}

// ── Defaults ──────────────────────────────────────────────────────────────────

impl Default for ChirpConfig {
    fn default() -> Self {
        Self {
            identity: IdentityConfig::default(),
            network: NetworkConfig::default(),
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            group: "chirp".to_string(),
            name: default_name(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            broadcast_addr: IpAddr::V4(Ipv4Addr::BROADCAST),
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: CHIRP_PORT,
        }
    }
}

/// Default peer name: the host name, when the OS will give us one.
fn default_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "chirp-peer".to_string())
}

// ── Path helpers ──────────────────────────────────────────────────────────────

fn config_dir() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
        .join("chirp")
}

fn home_dir() -> PathBuf {
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
    #[error("failed to write {0}: {1}")]
    WriteFailed(PathBuf, std::io::Error),
    #[error("failed to serialize: {0}")]
    SerializeFailed(toml::ser::Error),
}

// ── Loading ───────────────────────────────────────────────────────────────────

impl ChirpConfig {
    /// Load config: env vars → file → defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::file_path();
        let mut config = if path.exists() {
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadFailed(path.clone(), e))?;
            toml::from_str(&text).map_err(|e| ConfigError::ParseFailed(path.clone(), e))?
        } else {
            ChirpConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Config file path.
    pub fn file_path() -> PathBuf {
        std::env::var("CHIRP_CONFIG")
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
            let text = toml::to_string_pretty(&ChirpConfig::default())
                .map_err(ConfigError::SerializeFailed)?;
            std::fs::write(&path, text).map_err(|e| ConfigError::WriteFailed(path.clone(), e))?;
        }
        Ok(path)
    }

    /// The socket address outbound broadcasts are sent to.
    pub fn broadcast_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.broadcast_addr, self.network.port)
    }

    /// The socket address the receiver binds to.
    pub fn bind_addr(&self) -> SocketAddr {
        SocketAddr::new(self.network.bind_addr, self.network.port)
    }

    /// Apply CHIRP_* env var overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CHIRP_IDENTITY__GROUP") {
            self.identity.group = v;
        }
        if let Ok(v) = std::env::var("CHIRP_IDENTITY__NAME") {
            self.identity.name = v;
        }
        if let Ok(v) = std::env::var("CHIRP_NETWORK__BROADCAST_ADDR") {
            if let Ok(addr) = v.parse() {
                self.network.broadcast_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("CHIRP_NETWORK__BIND_ADDR") {
            if let Ok(addr) = v.parse() {
                self.network.bind_addr = addr;
            }
        }
        if let Ok(v) = std::env::var("CHIRP_NETWORK__PORT") {
            if let Ok(port) = v.parse() {
                self.network.port = port;
            }
        }
    }
}
