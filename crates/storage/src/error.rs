//! Storage error taxonomy.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("account not found: {0}")]
    AccountNotFound(String),

    #[error("oauth session not found: {0}")]
    SessionNotFound(String),

    #[error("storage busy, retry exhausted after {0} attempts")]
    Busy(u32),

    #[error("storage error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether this error represents a transient condition (SQLite
    /// `SQLITE_BUSY`/`SQLITE_LOCKED`) worth retrying under the store's
    /// backoff policy, versus a fatal condition that should surface
    /// immediately.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Database(sqlx::Error::Database(db_err)) => {
                matches!(db_err.code().as_deref(), Some("5") | Some("6"))
            }
            _ => false,
        }
    }
}
