//! # negsync Store
//!
//! Storage abstraction for the local record cache. Provides a trait-based
//! interface for resolving filters to local records, with an in-memory
//! implementation.
//!
//! ## Key Types
//!
//! - [`RecordStore`] - The async trait for all storage operations
//! - [`RecordStoreExt`] - Multi-component lookups used by the sync driver
//! - [`MemoryStore`] - In-memory storage
//! - [`InsertResult`] - Result of inserting a record
//!
//! ## Usage
//!
//! ```rust
//! use negsync_core::{AuthorKey, Filter, RecordBuilder, Timestamp};
//! use negsync_store::{MemoryStore, RecordStore};
//!
//! async fn example() {
//!     let store = MemoryStore::new();
//!     let author = AuthorKey::from_bytes([1; 32]);
//!     let record = RecordBuilder::new(author, 7375)
//!         .created_at(Timestamp(1_700_000_000))
//!         .build();
//!     store.insert_record(&record).await.unwrap();
//!
//!     let found = store.query(&Filter::new().author(author)).await.unwrap();
//!     assert_eq!(found.len(), 1);
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Idempotent inserts**: Inserting the same record twice returns `AlreadyExists`
//! - **Content addressing**: A record whose id does not match its content is rejected

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryStore;
pub use traits::{InsertResult, RecordStore, RecordStoreExt};
