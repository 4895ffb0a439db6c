//! Ledger error types

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the credit ledger
///
/// Duplicate consumption events are not errors: they resolve to a no-op that
/// returns the unchanged snapshot.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Caller supplied a value the ledger cannot apply (e.g. a negative delta)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Underlying storage read or write failed
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Storage did not answer within the configured bound
    #[error("Persistence timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// A consumption source could not produce a reading
    #[error("Source error: {0}")]
    Source(String),
}

impl LedgerError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        LedgerError::InvalidInput(msg.into())
    }

    pub fn persistence(msg: impl Into<String>) -> Self {
        LedgerError::Persistence(msg.into())
    }

    pub fn source(msg: impl Into<String>) -> Self {
        LedgerError::Source(msg.into())
    }

    /// Whether the caller may retry the same call unchanged
    ///
    /// Failed calls leave stored state untouched, so a retry with the same
    /// event cursor is applied at most once.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::Persistence(_) | LedgerError::Timeout(_) | LedgerError::Source(_)
        )
    }
}

impl From<sqlx::Error> for LedgerError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                LedgerError::Persistence("Timed out acquiring a database connection".to_string())
            }
            other => LedgerError::Persistence(other.to_string()),
        }
    }
}
