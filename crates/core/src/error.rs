//! Unified error types for hydrosync.
//!
//! Every variant renders with an upper-case code prefix so callers on the
//! JSON boundary can match on it without parsing prose.

use crate::fetch::FetchError;
use crate::model::SourceTag;
use rmcp::model::{ErrorCode, ErrorData as McpError};
use tokio_rusqlite::rusqlite;

/// Unified error types for the hydrosync services.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A single upstream feed failed. Recovered locally in normal operation.
    #[error("UPSTREAM_FETCH_FAILED: {tag}: {error}")]
    UpstreamFetch { tag: SourceTag, error: FetchError },

    /// Both feeds failed and no cached snapshot exists.
    #[error("TOTAL_FETCH_FAILURE: {0}")]
    TotalFetchFailure(String),

    /// Writing one station to the relational store failed.
    #[error("PERSISTENCE_WRITE_FAILED: station {station}: {message}")]
    PersistenceWrite { station: String, message: String },

    /// Database operation failed.
    #[error("DATABASE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("DATABASE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Invalid input parameters (e.g., unknown cache key).
    #[error("INVALID_INPUT: {0}")]
    InvalidInput(String),

    /// Sync requested without the required credential.
    #[error("UNAUTHORIZED: {0}")]
    Unauthorized(String),

    /// Configuration could not be loaded or is invalid.
    #[error("CONFIG_ERROR: {0}")]
    Config(String),
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<crate::config::ConfigError> for Error {
    fn from(err: crate::config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<Error> for McpError {
    fn from(err: Error) -> Self {
        let (code, message) = match &err {
            Error::InvalidInput(_) => (-32602, err.to_string()),
            Error::UpstreamFetch { .. } => (-32001, err.to_string()),
            Error::TotalFetchFailure(_) => (-32002, err.to_string()),
            Error::PersistenceWrite { .. } => (-32003, err.to_string()),
            Error::Database(_) | Error::MigrationFailed(_) => (-32004, err.to_string()),
            Error::Unauthorized(_) => (-32005, err.to_string()),
            Error::Config(_) => (-32006, err.to_string()),
        };

        McpError { code: ErrorCode(code), message: message.into(), data: None }
    }
}
