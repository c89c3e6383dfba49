//! Errors from account selection and rate-limit tracking.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Eligible set was empty at selection time. The diagnostic body
    /// lists account tiers/state, per the 503 response shape.
    #[error("no accounts available: {0}")]
    NoAccountsAvailable(String),

    #[error("all candidates failed: {0}")]
    AllCandidatesFailed(String),

    #[error("account not found: {0}")]
    NotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Auth(#[from] anthropic_auth::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<storage::Error> for Error {
    fn from(err: storage::Error) -> Self {
        Error::Storage(err.to_string())
    }
}
