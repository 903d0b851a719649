//! # negsync Core
//!
//! Pure primitives for negsync: record identifiers, records, filters and the
//! sealed digest set handed to a reconciliation engine.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`RecordId`] - Content-addressed identifier (Blake3 hash)
//! - [`Record`] - A domain record: id, author, kind, creation time, payload
//! - [`Filter`] / [`FilterSet`] - Declarative selection of the records being reconciled
//! - [`DigestSet`] - Ordered `(created_at, id)` pairs, immutable once sealed
//! - [`ReconciliationMessage`] - Opaque token exchanged with a peer

pub mod digest;
pub mod error;
pub mod filter;
pub mod message;
pub mod record;
pub mod types;

pub use digest::{DigestItem, DigestSet};
pub use error::{CoreError, Result};
pub use filter::{kinds, Filter, FilterComponent, FilterSet};
pub use message::ReconciliationMessage;
pub use record::{Record, RecordBuilder};
pub use types::{AuthorKey, RecordId, Timestamp};
