//! Configuration for modelstore
//!
//! A [`ManagerConfig`] can be built in code or loaded from a TOML file:
//!
//! ```toml
//! identifier = "podcasts"
//! database_path = "/var/lib/podcasts/library.sqlite"
//! should_raise_exceptions = false
//! criteria_quote = "'"
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PersistError, Result};

/// Per-manager settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    /// Manager identity; also names the default database file
    pub identifier: String,
    /// Database file; `None` means `<data dir>/<identifier>.sqlite`
    pub database_path: Option<PathBuf>,
    /// When false, recoverable engine errors are logged and a neutral value
    /// is returned instead
    pub should_raise_exceptions: bool,
    /// Warn when the manager is used off its owning thread or serial queue
    pub check_thread_discipline: bool,
    /// Quote character for literals in compiled criteria
    pub criteria_quote: char,
    /// Switch the database to write-ahead logging on open
    pub enable_wal: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            identifier: "default".to_string(),
            database_path: None,
            should_raise_exceptions: true,
            check_thread_discipline: true,
            criteria_quote: '\'',
            enable_wal: false,
        }
    }
}

impl ManagerConfig {
    pub fn with_identifier(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ManagerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Database file this configuration points at.
    pub fn resolved_database_path(&self) -> Result<PathBuf> {
        if let Some(path) = &self.database_path {
            return Ok(path.clone());
        }
        let base = dirs::data_dir().ok_or_else(|| {
            PersistError::Config("no platform data directory available".to_string())
        })?;
        Ok(base.join(format!("{}.sqlite", self.identifier)))
    }

    fn validate(&self) -> Result<()> {
        if self.identifier.trim().is_empty() {
            return Err(PersistError::Config("identifier must not be empty".into()));
        }
        if !matches!(self.criteria_quote, '\'' | '"') {
            return Err(PersistError::Config(format!(
                "criteria_quote must be ' or \", got {:?}",
                self.criteria_quote
            )));
        }
        Ok(())
    }
}
