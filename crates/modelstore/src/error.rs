//! Error types for modelstore

use thiserror::Error;

/// Result type alias for persistence operations
pub type Result<T> = std::result::Result<T, PersistError>;

/// Main error type for persistence operations
#[derive(Error, Debug)]
pub enum PersistError {
    /// Invalid entity metadata, or a table/column could not be created
    #[error("Schema error: {0}")]
    Schema(String),

    /// A compiled statement failed inside the engine
    #[error("Execution error: {0}")]
    Execution(String),

    /// An operation was attempted before a database was opened
    #[error("Database is not open")]
    DatabaseClosed,

    /// Update or delete on a record that has no primary key value
    #[error("Record of type {entity} has no primary key value")]
    MissingPrimaryKey { entity: String },

    /// Bitfield keys cannot be used as fetch predicates
    #[error("Bitfield key '{key}' of {entity} cannot be used in criteria")]
    BitfieldCriterion { entity: String, key: String },

    /// Configuration could not be parsed
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl PersistError {
    /// Errors that the lenient (non-raising) mode may swallow.
    ///
    /// Only engine execution failures qualify; schema, configuration and
    /// caller mistakes are always returned.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PersistError::Execution(_))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PersistError {
    fn from(err: rusqlite::Error) -> Self {
        PersistError::Execution(err.to_string())
    }
}

impl From<std::io::Error> for PersistError {
    fn from(err: std::io::Error) -> Self {
        PersistError::Io(err.to_string())
    }
}

impl From<toml::de::Error> for PersistError {
    fn from(err: toml::de::Error) -> Self {
        PersistError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_execution_errors_are_recoverable() {
        assert!(PersistError::Execution("no such table".into()).is_recoverable());
        assert!(!PersistError::Schema("bad".into()).is_recoverable());
        assert!(!PersistError::DatabaseClosed.is_recoverable());
        assert!(!PersistError::BitfieldCriterion {
            entity: "Album".into(),
            key: "wifiOnly".into(),
        }
        .is_recoverable());
    }

    #[test]
    fn error_display() {
        let err = PersistError::MissingPrimaryKey {
            entity: "Album".into(),
        };
        assert!(err.to_string().contains("Album"));

        let err = PersistError::BitfieldCriterion {
            entity: "Album".into(),
            key: "autoDownload".into(),
        };
        assert!(err.to_string().contains("autoDownload"));
    }
}
