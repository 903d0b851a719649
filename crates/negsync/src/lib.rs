//! # negsync
//!
//! Keeps a local record cache in sync with several remote endpoints using
//! set reconciliation, so only records missing on one side are moved.
//!
//! ## Overview
//!
//! - **Sessions**: one reconciliation state machine per endpoint
//!   ([`negsync_proto::EndpointSession`])
//! - **Orchestrator**: runs every endpoint's session concurrently and
//!   aggregates progress ([`SyncOrchestrator`])
//! - **State**: per-endpoint [`SessionState`] and [`GlobalProgress`],
//!   observable through watch channels
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use negsync::{OrchestratorConfig, SessionServices, SyncOrchestrator};
//! use negsync::proto::WsConnector;
//! use negsync::store::MemoryStore;
//!
//! async fn example(
//!     records: Arc<dyn negsync::proto::RecordTransport>,
//!     engines: Arc<dyn negsync::proto::EngineFactory>,
//! ) -> negsync::Result<()> {
//!     let config = OrchestratorConfig::load("negsync.json")?;
//!     let services = SessionServices {
//!         connector: Arc::new(WsConnector),
//!         store: Arc::new(MemoryStore::new()),
//!         records,
//!         engines,
//!     };
//!
//!     let orchestrator = SyncOrchestrator::new(config, services)?;
//!     let report = orchestrator.start_sync().await?;
//!     for session in report.failed() {
//!         eprintln!("{}: {:?}", session.url, session.error);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `negsync::core` - Records, filters, digest sets
//! - `negsync::store` - Local record store abstraction
//! - `negsync::proto` - Codec, transports, engine capability, sessions

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod progress;

// Re-export component crates
pub use negsync_core as core;
pub use negsync_proto as proto;
pub use negsync_store as store;

// Re-export main types for convenience
pub use config::OrchestratorConfig;
pub use error::{Error, Result};
pub use orchestrator::SyncOrchestrator;
pub use progress::{GlobalProgress, SyncRunReport};

pub use negsync_core::{AuthorKey, Filter, FilterSet, Record, RecordId};
pub use negsync_proto::{
    SessionReport, SessionServices, SessionState, SessionStatus, SyncConfig, SyncError,
};
