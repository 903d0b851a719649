//! RecordStore trait: the abstract interface for the local record cache.
//!
//! This trait keeps the sync driver storage-agnostic. The driver only reads
//! through filters and ingests records downloaded from endpoints.

use std::collections::HashSet;

use async_trait::async_trait;
use negsync_core::{Filter, FilterSet, Record, RecordId};

use crate::error::Result;

/// Result of inserting a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertResult {
    /// Record was inserted.
    Inserted,
    /// Record already exists (idempotent - not an error).
    AlreadyExists,
}

/// Async interface for local record persistence.
#[async_trait]
pub trait RecordStore: Send + Sync {
    // ─────────────────────────────────────────────────────────────────────────
    // Record Operations
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a record.
    ///
    /// # Returns
    /// - `Inserted` if the record was new.
    /// - `AlreadyExists` if a record with the same id exists.
    ///
    /// A record whose id does not match its content is rejected with
    /// `StoreError::InvalidData`.
    async fn insert_record(&self, record: &Record) -> Result<InsertResult>;

    /// Get a record by its content-addressed ID.
    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>>;

    /// Check if a record exists by ID.
    async fn has_record(&self, id: &RecordId) -> Result<bool>;

    // ─────────────────────────────────────────────────────────────────────────
    // Queries
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve a filter to matching local records.
    ///
    /// Records are ordered by `(created_at, id)`. When the filter carries a
    /// `limit`, the newest `limit` records are returned.
    async fn query(&self, filter: &Filter) -> Result<Vec<Record>>;

    /// Number of records held.
    async fn count(&self) -> Result<usize>;
}

/// Extension trait for multi-filter lookups.
pub trait RecordStoreExt: RecordStore {
    /// Query every component of `filters` and union the results by id.
    ///
    /// A component that fails is logged and skipped; the remaining components
    /// still contribute. Order follows first appearance.
    fn fetch_local_records(
        &self,
        filters: &FilterSet,
    ) -> impl std::future::Future<Output = Vec<Record>> + Send;
}

impl<S: RecordStore + ?Sized> RecordStoreExt for S {
    async fn fetch_local_records(&self, filters: &FilterSet) -> Vec<Record> {
        let mut seen = HashSet::new();
        let mut records = Vec::new();

        for component in filters.components() {
            match self.query(&component.filter).await {
                Ok(found) => {
                    tracing::debug!(
                        component = %component.name,
                        count = found.len(),
                        "local records for filter component"
                    );
                    records.extend(found.into_iter().filter(|r| seen.insert(r.id)));
                }
                Err(e) => {
                    tracing::warn!(
                        component = %component.name,
                        error = %e,
                        "failed to query local records, skipping component"
                    );
                }
            }
        }

        records
    }
}
