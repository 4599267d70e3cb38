//! Error types for SliceDB
//!
//! This module defines the common error type used throughout the system.

use thiserror::Error;

/// Common result type for SliceDB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for SliceDB
#[derive(Debug, Error)]
pub enum Error {
    // Lookup errors
    #[error("{0} not found")]
    NotFound(String),

    // Quorum errors
    #[error("too many errors")]
    TooManyErrors,

    #[error("undetermined")]
    Undetermined,

    // Validation errors
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("revision too low")]
    RevisionTooLow,

    #[error("inconsistent spec")]
    InconsistentSpec,

    #[error("sync already pending")]
    SyncPending,

    #[error("blob too large: {0} bytes")]
    BlobTooLarge(usize),

    #[error("content length unknown")]
    UnknownLength,

    #[error("hex: {0}")]
    Hex(#[from] hex::FromHexError),

    // Protocol errors
    #[error("signature verification failed")]
    BadSignature,

    #[error("not the target node")]
    NotTarget,

    #[error("not the master")]
    NotMaster,

    #[error("key and value mismatch")]
    KeyMismatch,

    // Substrate errors
    #[error("storage: {0}")]
    Storage(String),

    #[error("i/o: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec: {0}")]
    Codec(#[from] serde_json::Error),

    // Network errors
    #[error("rpc: {0}")]
    Rpc(String),

    // Cancellation
    #[error("canceled")]
    Canceled,

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a not found error; `what` names the missing thing
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Create a generic error
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Check if this is a not found error
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// HTTP status code this error translates to at the service surface
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            // 400 Bad Request
            Self::InvalidKey(_)
            | Self::InvalidRequest(_)
            | Self::RevisionTooLow
            | Self::Hex(_) => 400,

            // 401 Unauthorized
            Self::BadSignature | Self::NotTarget | Self::NotMaster => 401,

            // 406 Not Acceptable
            Self::BlobTooLarge(_) | Self::UnknownLength => 406,

            // 500 Internal Server Error
            _ => 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_not_found() {
        assert!(Error::not_found("approved spec").is_not_found());
        assert!(!Error::TooManyErrors.is_not_found());
    }

    #[test]
    fn test_error_http_status() {
        assert_eq!(Error::InvalidKey("short".into()).http_status(), 400);
        assert_eq!(Error::BadSignature.http_status(), 401);
        assert_eq!(Error::BlobTooLarge(70_000).http_status(), 406);
        assert_eq!(Error::storage("boom").http_status(), 500);
        assert_eq!(Error::Canceled.http_status(), 500);
    }
}
