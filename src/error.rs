//! Crate-wide error type.
//!
//! Every fallible operation in the crate returns [`Result`]. The variant set
//! mirrors canonical status codes so callers can branch on the failure class
//! without parsing messages.

use thiserror::Error;

/// Tokenizer errors
#[derive(Debug, Error)]
pub enum Error {
    #[error("cancelled: {0}")]
    Cancelled(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("unimplemented: {0}")]
    Unimplemented(String),

    #[error("internal: {0}")]
    Internal(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("data loss: {0}")]
    DataLoss(String),

    #[error("unknown: {0}")]
    Unknown(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Shorthand for [`Error::Internal`].
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }

    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

/// Result type for tokenizer operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::invalid_argument("vocab_size must be positive");
        assert_eq!(
            err.to_string(),
            "invalid argument: vocab_size must be positive"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
