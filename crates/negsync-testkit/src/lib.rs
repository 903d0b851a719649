//! # negsync Testkit
//!
//! Testing utilities for negsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an author identity with a memory store, and record makers
//! - **Generators**: Proptest strategies for property-based testing
//! - **Engines**: a scripted engine and a naive list-exchange engine
//! - **Relays**: mock endpoints on the in-memory network, with a matching
//!   record transport
//! - **Faults**: a connector that never connects, a store that fails reads
//!
//! ## Mock Endpoints
//!
//! ```rust,ignore
//! use negsync_testkit::{ListEngine, RelayHub, RelayMode, TestFixture};
//!
//! let fixture = TestFixture::new();
//! let hub = RelayHub::new();
//! let relay = hub
//!     .start("mem://relay", fixture.make_tokens(0, 3), RelayMode::Responder)
//!     .await;
//! // Hand hub.network(), hub and ListEngine::factory() to a session.
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use negsync_testkit::generators::{record_from_params, RecordParams};
//!
//! proptest! {
//!     #[test]
//!     fn record_id_is_deterministic(params: RecordParams) {
//!         let r1 = record_from_params(&params);
//!         let r2 = record_from_params(&params);
//!         prop_assert_eq!(r1.id, r2.id);
//!     }
//! }
//! ```

pub mod engines;
pub mod faults;
pub mod fixtures;
pub mod generators;
pub mod relay;

pub use engines::{ListEngine, ListResponder, ScriptStep, ScriptedEngine, ScriptedFactory};
pub use faults::{FailingStore, StalledConnector};
pub use fixtures::{multi_party_fixtures, TestFixture};
pub use generators::{record_from_params, RecordParams};
pub use relay::{MockRelay, RelayHub, RelayMode, Reply};

/// Route `tracing` output to the test harness. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
