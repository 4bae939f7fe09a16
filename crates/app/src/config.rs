//! Server configuration
//!
//! Loaded from a TOML file (`tally.toml` by default). A missing file falls
//! back to the defaults below; a malformed one is an error.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Identity announced in pings and presence broadcasts
    pub server_id: String,
    /// Seconds between presence broadcasts
    pub broadcast_interval_secs: u64,
    /// Terminals admitted on startup (written through to the whitelist)
    pub admit: Vec<String>,
    pub paths: PathsConfig,
    pub terminal: TerminalConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_id: "server".to_string(),
            broadcast_interval_secs: 60,
            admit: Vec::new(),
            paths: PathsConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

/// Where the server keeps its state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_dir: PathBuf,
    pub report_dir: PathBuf,
    pub whitelist: PathBuf,
    pub log_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            report_dir: PathBuf::from("reports"),
            whitelist: PathBuf::from("whitelist.txt"),
            log_dir: PathBuf::from("logs"),
        }
    }
}

/// The embedded terminal for single-host deployments: badge ids are typed on
/// stdin instead of read from hardware
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    pub enabled: bool,
    pub terminal_id: String,
    pub scan_interval_ms: u64,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            terminal_id: "terminal".to_string(),
            scan_interval_ms: 100,
        }
    }
}

impl ServerConfig {
    /// Load from `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(toml::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn broadcast_interval(&self) -> Duration {
        Duration::from_secs(self.broadcast_interval_secs)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_millis(self.terminal.scan_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ServerConfig::load(&dir.path().join("tally.toml")).unwrap();

        assert_eq!(config.server_id, "server");
        assert_eq!(config.broadcast_interval_secs, 60);
        assert!(config.admit.is_empty());
        assert!(config.terminal.enabled);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally.toml");
        fs::write(
            &path,
            r#"
server_id = "hq"
admit = ["gate-1", "gate-2"]

[terminal]
enabled = false
"#,
        )
        .unwrap();

        let config = ServerConfig::load(&path).unwrap();
        assert_eq!(config.server_id, "hq");
        assert_eq!(config.admit, ["gate-1", "gate-2"]);
        assert!(!config.terminal.enabled);
        // Untouched sections keep their defaults
        assert_eq!(config.broadcast_interval_secs, 60);
        assert_eq!(config.paths.data_dir, PathBuf::from("data"));
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tally.toml");
        fs::write(&path, "server_id = [not toml").unwrap();

        assert!(matches!(
            ServerConfig::load(&path),
            Err(ConfigError::Parse(_))
        ));
    }
}
