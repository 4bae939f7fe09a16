//! Terminal admission control
//!
//! The whitelist of terminals allowed to submit attendance records, persisted
//! one terminal id per line. A missing file is created empty on open.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{error, info};

use crate::error::{Error, Result};

/// Persisted set of admitted terminal ids
#[derive(Debug)]
pub struct AdmissionList {
    path: PathBuf,
    terminals: Vec<String>,
}

impl AdmissionList {
    /// Load the list from `path`, creating an empty file when missing
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
            fs::write(&path, "")?;
            info!(path = %path.display(), "created empty admission list");
        }

        let terminals: Vec<String> = fs::read_to_string(&path)?
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        info!(terminals = terminals.len(), "admission list loaded");
        Ok(Self { path, terminals })
    }

    /// Admit a terminal. Returns false (and logs) when it is already listed.
    pub fn add(&mut self, terminal_id: &str) -> Result<bool> {
        let terminal_id = terminal_id.trim();
        if terminal_id.is_empty() || terminal_id.contains(char::is_whitespace) {
            return Err(Error::InvalidInput(
                "terminal id must be a single non-empty token".to_string(),
            ));
        }

        if self.contains(terminal_id) {
            error!(terminal_id, "terminal is already admitted");
            return Ok(false);
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{terminal_id}")?;
        file.sync_all()?;

        self.terminals.push(terminal_id.to_string());
        info!(terminal_id, "terminal admitted");
        Ok(true)
    }

    /// Revoke a terminal. Returns false (and logs) when it is not listed.
    pub fn remove(&mut self, terminal_id: &str) -> Result<bool> {
        if !self.contains(terminal_id) {
            error!(terminal_id, "terminal is not in the admission list");
            return Ok(false);
        }

        self.terminals.retain(|id| id != terminal_id);
        let mut body = self.terminals.join("\n");
        if !body.is_empty() {
            body.push('\n');
        }
        fs::write(&self.path, body)?;

        info!(terminal_id, "terminal admission revoked");
        Ok(true)
    }

    /// Whether a terminal may submit attendance records
    pub fn contains(&self, terminal_id: &str) -> bool {
        self.terminals.iter().any(|id| id == terminal_id)
    }

    /// Admitted terminal ids, in insertion order
    pub fn terminals(&self) -> &[String] {
        &self.terminals
    }

    pub fn len(&self) -> usize {
        self.terminals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terminals.is_empty()
    }

    /// Backing file path
    pub fn path(&self) -> &Path {
        &self.path
    }
}
