//! WolfMembership Error Types

use thiserror::Error;

/// Result type alias for WolfMembership operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfMembership error types
#[derive(Error, Debug)]
pub enum Error {
    // Caller errors
    #[error("Invalid argument: {0}")]
    Argument(String),

    #[error("Format error: {0}")]
    Format(String),

    #[error("Row not found: {0}")]
    NotFound(String),

    // Store errors
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store constraint violated: {0}")]
    Conflict(String),

    #[error("Provider not initialized: {0}")]
    NotInitialized(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if the host runtime may retry the call that produced this error
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Store(_) | Error::Conflict(_))
    }

    /// Check if this error is a uniqueness violation reported by the store
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(ref code, _)
                if code.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Error::Conflict(e.to_string())
            }
            other => Error::Store(format!("SQLite error: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(Error::Store("disk I/O error".into()).is_retryable());
        assert!(Error::Conflict("UNIQUE".into()).is_retryable());
        assert!(!Error::Argument("entry".into()).is_retryable());
        assert!(!Error::NotFound("10.0.0.1:11111@1".into()).is_retryable());
    }

    #[test]
    fn test_constraint_violation_maps_to_conflict() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err: Error = conn
            .execute("INSERT INTO t VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(err.is_conflict());

        let err: Error = conn
            .execute("INSERT INTO missing VALUES (1)", [])
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::Store(_)));
    }
}
