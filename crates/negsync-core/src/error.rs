//! Error types for negsync core.

use thiserror::Error;

/// Core errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CoreError {
    /// Insertion into a digest set after it was sealed.
    ///
    /// This is a programming error: callers build a digest set, seal it once
    /// and hand it to an engine. It never arises from peer input.
    #[error("digest set is sealed, insertion of {0} rejected")]
    DigestSealed(String),

    #[error("invalid hex: {0}")]
    InvalidHex(String),

    #[error("invalid length: expected {expected} bytes, got {got}")]
    InvalidLength { expected: usize, got: usize },
}

impl From<hex::FromHexError> for CoreError {
    fn from(e: hex::FromHexError) -> Self {
        CoreError::InvalidHex(e.to_string())
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
