//! # negsync proto
//!
//! Drives set-reconciliation sessions against remote endpoints.
//!
//! ## Overview
//!
//! A session computes a sealed digest of the local records selected by a
//! filter set, hands it to a [`ReconciliationEngine`], and exchanges the
//! engine's opaque messages with one endpoint over a text-frame
//! [`Link`]. Each round yields ids to upload (`have`) and ids to download
//! (`need`); payloads move through a [`RecordTransport`].
//!
//! ## Key Properties
//!
//! - **Isolated**: one subscription id per session; frames for other ids are
//!   discarded by the connection demultiplexer
//! - **Sequential**: one outbound frame per inbound round
//! - **Bounded**: connect timeout, a global watchdog, and a soft fetch limit
//! - **Observable**: state is published through a watch channel
//!
//! ## Message Flow
//!
//! ```text
//! Client                                    Endpoint
//!   |-- ["NEG-OPEN", sub, filter, msg] ------>|
//!   |<------------- ["NEG-MSG", sub, msg] ----|
//!   |   (upload have / download need)         |
//!   |-- ["NEG-MSG", sub, msg] --------------->|
//!   |<------------- ["NEG-MSG", sub, msg] ----|
//!   |-- ["NEG-CLOSE", sub] ------------------>|
//!
//!   at any point:
//!   |<------------- ["NEG-ERR", sub, reason] -|
//! ```

pub mod config;
pub mod connection;
pub mod engine;
pub mod error;
pub mod messages;
pub mod records;
pub mod session;
pub mod state;
pub mod transport;
pub mod ws;

pub use config::SyncConfig;
pub use connection::{RelayConnection, Subscription};
pub use engine::{EngineFactory, ReconcileOutcome, ReconciliationEngine};
pub use error::{EngineError, MessageParseError, Result, SyncError, TimeoutKind};
pub use messages::{generate_subscription_id, tags, NegFrame};
pub use records::RecordTransport;
pub use session::{DeltaAccumulator, EndpointSession, SessionReport, SessionServices};
pub use state::{SessionState, SessionStatus, StateHandle, SyncPhase};
pub use transport::{
    memory::{MemoryListener, MemoryNetwork, MemoryPeer},
    Connector, FrameSink, FrameStream, Link,
};
pub use ws::WsConnector;
