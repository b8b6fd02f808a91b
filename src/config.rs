//! Configuration for twochat.
//!
//! Settings are read from `~/.twochat/config.toml`. Every field is optional;
//! missing fields and unreadable files fall back to the defaults below.
//!
//! ```toml
//! # error, warn, info, debug, trace
//! log_level = "info"
//!
//! [network]
//! default_host = "localhost"
//! default_port = 1501
//! connect_timeout_ms = 10000
//! write_timeout_ms = 5000
//! accept_poll_ms = 20
//!
//! [transcript]
//! save_path = "~/chat.txt"
//! ```

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::SessionOptions;

/// Port used when none is given
pub const DEFAULT_PORT: u16 = 1501;
/// Host used when none is given
pub const DEFAULT_HOST: &str = "localhost";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Could not determine config path")]
    NoHome,

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Failed to write config: {0}")]
    Write(#[from] std::io::Error),
}

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Log level for the log file
    pub log_level: String,
    /// Connection settings
    pub network: NetworkConfig,
    /// Transcript settings
    pub transcript: TranscriptConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            network: NetworkConfig::default(),
            transcript: TranscriptConfig::default(),
        }
    }
}

/// Network configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub default_host: String,
    pub default_port: u16,
    pub connect_timeout_ms: u64,
    /// 0 disables the send timeout
    pub write_timeout_ms: u64,
    pub accept_poll_ms: u64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            default_host: DEFAULT_HOST.to_string(),
            default_port: DEFAULT_PORT,
            connect_timeout_ms: 10_000,
            write_timeout_ms: 5_000,
            accept_poll_ms: 20,
        }
    }
}

/// Transcript configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptConfig {
    /// Where `/save` writes when no path is given
    pub save_path: Option<String>,
}

impl Config {
    /// Load configuration from file
    pub fn load() -> Self {
        if let Some(path) = Self::get_config_path() {
            if path.exists() {
                if let Ok(content) = fs::read_to_string(&path) {
                    return Self::parse(&content);
                }
            }
        }
        Self::default()
    }

    /// Parse TOML text, falling back to defaults when it is invalid
    pub fn parse(content: &str) -> Self {
        toml::from_str(content).unwrap_or_default()
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<PathBuf, ConfigError> {
        let path = Self::get_config_path().ok_or(ConfigError::NoHome)?;
        let content = toml::to_string_pretty(self)?;
        fs::write(&path, content)?;
        Ok(path)
    }

    /// Directory holding config, log and default transcript
    pub fn app_dir() -> Option<PathBuf> {
        home_dir().map(|home| home.join(".twochat"))
    }

    /// Get config file path
    fn get_config_path() -> Option<PathBuf> {
        let dir = Self::app_dir()?;
        if !dir.exists() {
            let _ = fs::create_dir_all(&dir);
        }
        Some(dir.join("config.toml"))
    }

    /// Session tunables derived from the network section
    pub fn session_options(&self) -> SessionOptions {
        let net = &self.network;
        SessionOptions {
            connect_timeout: Duration::from_millis(net.connect_timeout_ms.max(1)),
            write_timeout: match net.write_timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            accept_poll: Duration::from_millis(net.accept_poll_ms.max(1)),
        }
    }

    /// Where transcripts are saved by default
    pub fn transcript_path(&self) -> PathBuf {
        match &self.transcript.save_path {
            Some(path) => expand_home(path),
            None => home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("transcript.txt"),
        }
    }
}

/// Expand a leading `~/` to the home directory
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Get home directory
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}
