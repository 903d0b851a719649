//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::Arc;

use negsync_core::{kinds, AuthorKey, FilterSet, Record, RecordBuilder, Timestamp};
use negsync_store::MemoryStore;

/// A test fixture with an author identity and a memory store.
pub struct TestFixture {
    pub author: AuthorKey,
    pub store: Arc<MemoryStore>,
}

impl TestFixture {
    pub fn new() -> Self {
        Self::with_seed([0x42; 32])
    }

    /// Create with a deterministic author from seed.
    pub fn with_seed(seed: [u8; 32]) -> Self {
        Self {
            author: AuthorKey::from_bytes(seed),
            store: Arc::new(MemoryStore::new()),
        }
    }

    /// The wallet filter set for this fixture's author.
    pub fn filters(&self) -> FilterSet {
        FilterSet::wallet(self.author)
    }

    /// A record of `kind` by this fixture's author.
    pub fn make_record(&self, kind: u32, created_at: u64, payload: &str) -> Record {
        RecordBuilder::new(self.author, kind)
            .created_at(Timestamp::from_secs(created_at))
            .payload(payload.to_string())
            .build()
    }

    /// A token record.
    pub fn make_token(&self, created_at: u64) -> Record {
        self.make_record(kinds::TOKEN, created_at, &format!("token-{created_at}"))
    }

    /// A deletion record naming `target`.
    pub fn make_deletion(&self, created_at: u64, target: &Record) -> Record {
        RecordBuilder::new(self.author, kinds::DELETION)
            .created_at(Timestamp::from_secs(created_at))
            .tag("e", &target.id.to_hex())
            .tag("k", &target.kind.to_string())
            .build()
    }

    /// `count` token records with consecutive timestamps from `start`.
    pub fn make_tokens(&self, start: u64, count: usize) -> Vec<Record> {
        (0..count as u64).map(|i| self.make_token(start + i)).collect()
    }

    /// Insert `records` into the fixture's store.
    pub async fn seed(&self, records: &[Record]) {
        use negsync_store::RecordStore;

        for record in records {
            // Fixture records always carry a valid id.
            let _ = self.store.insert_record(record).await;
        }
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Create multiple fixtures with distinct authors.
pub fn multi_party_fixtures(count: usize) -> Vec<TestFixture> {
    (0..count)
        .map(|i| {
            let mut seed = [0u8; 32];
            seed[0] = i as u8;
            seed[31] = 1;
            TestFixture::with_seed(seed)
        })
        .collect()
}
