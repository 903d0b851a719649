//! Error types for the session driver.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A frame that could not be decoded.
///
/// Malformed frames are dropped by the connection; they never terminate it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MessageParseError {
    #[error("invalid JSON: {0}")]
    InvalidJson(String),

    #[error("frame is not a JSON array")]
    NotAnArray,

    #[error("missing field: {0}")]
    MissingField(&'static str),

    /// A well-formed frame of a type this protocol does not handle
    /// (e.g. `NOTICE`).
    #[error("unknown frame type: {0}")]
    UnknownType(String),

    #[error("invalid {field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

/// Failure reported by a reconciliation engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("reconciliation engine failed: {0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Which deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutKind {
    /// Opening the connection.
    Connect,
    /// The global watchdog over the whole reconciliation.
    Sync,
    /// The download sub-phase. Never terminal for a session.
    Fetch,
}

impl fmt::Display for TimeoutKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutKind::Connect => f.write_str("connect"),
            TimeoutKind::Sync => f.write_str("sync"),
            TimeoutKind::Fetch => f.write_str("fetch"),
        }
    }
}

/// Errors that can occur during a sync session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Transport failed to open or dropped unexpectedly.
    #[error("connection error: {0}")]
    Connection(String),

    /// The peer sent an ERR frame. The reason is kept verbatim.
    #[error("peer error: {0}")]
    Protocol(String),

    /// A frame could not be decoded.
    #[error("malformed message: {0}")]
    MessageParse(#[from] MessageParseError),

    /// The reconciliation engine failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A deadline elapsed.
    #[error("{kind} timed out after {after:?}")]
    Timeout { kind: TimeoutKind, after: Duration },

    /// Local store failure.
    #[error("store error: {0}")]
    Store(#[from] negsync_store::StoreError),

    /// Publishing or fetching a record failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// The task driving the session panicked or was cancelled.
    #[error("session task failed: {0}")]
    Task(String),
}

impl SyncError {
    /// Whether this error is a timeout of the given kind.
    pub fn is_timeout(&self, kind: TimeoutKind) -> bool {
        matches!(self, SyncError::Timeout { kind: k, .. } if *k == kind)
    }
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
