//! Error types for the orchestrator.

use negsync_store::StoreError;
use negsync_proto::SyncError;
use thiserror::Error;

/// Errors surfaced by [`SyncOrchestrator`](crate::SyncOrchestrator)
/// operations.
///
/// Session failures are not among them: those settle into the session's
/// state and its [`SessionReport`](negsync_proto::SessionReport).
#[derive(Debug, Error)]
pub enum Error {
    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// A run is already in progress. Nothing was started.
    #[error("a sync run is already in progress")]
    AlreadyRunning,

    /// No user identity to build filters for.
    #[error("no identity set")]
    NoIdentity,

    /// Nothing to sync against.
    #[error("no endpoints configured")]
    NoEndpoints,

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Result type for orchestrator operations.
pub type Result<T> = std::result::Result<T, Error>;
