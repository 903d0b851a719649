//! In-memory implementation of the RecordStore trait.
//!
//! Everything is lost when the store is dropped. Useful for tests and for
//! embedding a cache that another layer persists.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use negsync_core::{Filter, Record, RecordId};

use crate::error::{Result, StoreError};
use crate::traits::{InsertResult, RecordStore};

/// In-memory store implementation. Thread-safe via RwLock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<RecordId, Record>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `records`.
    ///
    /// Records with a mismatched id are skipped.
    pub fn with_records(records: impl IntoIterator<Item = Record>) -> Self {
        let map = records
            .into_iter()
            .filter(Record::verify_id)
            .map(|r| (r.id, r))
            .collect();
        Self {
            records: RwLock::new(map),
        }
    }

    /// Snapshot of all record ids.
    pub fn ids(&self) -> Vec<RecordId> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<_> = records.keys().copied().collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_record(&self, record: &Record) -> Result<InsertResult> {
        if !record.verify_id() {
            return Err(StoreError::InvalidData(format!(
                "record {} does not match its content",
                record.id
            )));
        }

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&record.id) {
            return Ok(InsertResult::AlreadyExists);
        }
        records.insert(record.id, record.clone());
        Ok(InsertResult::Inserted)
    }

    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(id).cloned())
    }

    async fn has_record(&self, id: &RecordId) -> Result<bool> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.contains_key(id))
    }

    async fn query(&self, filter: &Filter) -> Result<Vec<Record>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);

        let mut found: Vec<Record> = records
            .values()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        found.sort_by(|a, b| (a.created_at, a.id).cmp(&(b.created_at, b.id)));

        if let Some(limit) = filter.limit {
            let skip = found.len().saturating_sub(limit);
            found.drain(..skip);
        }

        Ok(found)
    }

    async fn count(&self) -> Result<usize> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.len())
    }
}
