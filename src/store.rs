//! Shared store plumbing: the store error type and `sqlx` error mapping.

use sha2::{Digest, Sha256};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique index rejected the write.
    #[error("unique constraint violated")]
    Conflict,
    /// The store did not answer in time (pool acquire or statement timeout).
    #[error("store timed out")]
    Timeout,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_unique_violation(&err) {
            return Self::Conflict;
        }
        match err {
            sqlx::Error::PoolTimedOut => Self::Timeout,
            sqlx::Error::Database(ref db_err) if db_err.code().is_some_and(|c| c == "57014") => {
                // query_canceled: statement_timeout fired
                Self::Timeout
            }
            other => Self::Backend(anyhow::Error::new(other)),
        }
    }
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().is_some_and(|code| code.as_ref() == "23505"),
        _ => false,
    }
}

/// Hash an opaque secret so raw values never touch the database.
pub(crate) fn hash_secret(value: &str) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hasher.finalize().to_vec()
}
