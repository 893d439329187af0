//! Error types.

use std::io;

use thiserror::Error;

/// Errors surfaced by cache construction and operations.
///
/// Allocation failure during `put` is not an error; it is reported as
/// [`PutOutcome::NoSpace`](crate::cache::PutOutcome::NoSpace).
#[derive(Debug, Error)]
pub enum CacheError {
    /// A builder option failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An argument failed validation before any lock was taken.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The cache was closed.
    #[error("cache is closed")]
    Closed,

    /// A serializer, sink, or the region allocation failed.
    #[error("i/o failure")]
    Io(#[from] io::Error),

    /// The requested view cannot be materialized safely.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_context() {
        let err = CacheError::Config("capacity must be at least 8388608".into());
        assert!(err.to_string().contains("8388608"));
        assert_eq!(CacheError::Closed.to_string(), "cache is closed");
    }

    #[test]
    fn io_errors_convert() {
        let io = io::Error::new(io::ErrorKind::BrokenPipe, "sink failed");
        let err: CacheError = io.into();
        assert!(matches!(err, CacheError::Io(_)));
    }
}
