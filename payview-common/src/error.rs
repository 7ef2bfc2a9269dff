//! Common error types for PayView

use thiserror::Error;

/// Common result type for PayView operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types across PayView services
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Concurrent write collided with another writer; retry with fresh reads
    #[error("Write conflict: {0}")]
    Conflict(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// True for errors that a fresh read-modify-write attempt may resolve
    ///
    /// Covers optimistic version mismatches as well as SQLite lock/busy
    /// failures raised when two writers race for the same database.
    pub fn is_retryable_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_)) || self.is_database_locked()
    }

    /// True when SQLite refused the write lock (SQLITE_BUSY / SQLITE_LOCKED)
    pub fn is_database_locked(&self) -> bool {
        match self {
            Error::Database(db_err) => {
                let msg = db_err.to_string();
                msg.contains("database is locked") || msg.contains("database is busy")
            }
            _ => false,
        }
    }
}
