//! Collaborators that misbehave on purpose.

use std::collections::BTreeSet;

use async_trait::async_trait;

use negsync_core::{Filter, Record, RecordId};
use negsync_proto::{Connector, Link, Result};
use negsync_store::{self as store, InsertResult, MemoryStore, RecordStore, StoreError};

/// A connector whose connect never completes.
#[derive(Debug, Default, Clone, Copy)]
pub struct StalledConnector;

#[async_trait]
impl Connector for StalledConnector {
    async fn connect(&self, _url: &str) -> Result<Link> {
        std::future::pending().await
    }
}

/// A memory store whose queries fail for chosen kinds.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: MemoryStore,
    failing_kinds: BTreeSet<u32>,
}

impl FailingStore {
    pub fn new(records: impl IntoIterator<Item = Record>) -> Self {
        Self {
            inner: MemoryStore::with_records(records),
            failing_kinds: BTreeSet::new(),
        }
    }

    /// Queries constraining any of `kinds` fail.
    pub fn fail_kinds(mut self, kinds: impl IntoIterator<Item = u32>) -> Self {
        self.failing_kinds.extend(kinds);
        self
    }
}

#[async_trait]
impl RecordStore for FailingStore {
    async fn insert_record(&self, record: &Record) -> store::Result<InsertResult> {
        self.inner.insert_record(record).await
    }

    async fn get_record(&self, id: &RecordId) -> store::Result<Option<Record>> {
        self.inner.get_record(id).await
    }

    async fn has_record(&self, id: &RecordId) -> store::Result<bool> {
        self.inner.has_record(id).await
    }

    async fn query(&self, filter: &Filter) -> store::Result<Vec<Record>> {
        let hits = filter
            .kinds
            .iter()
            .flatten()
            .any(|k| self.failing_kinds.contains(k));
        if hits {
            return Err(StoreError::Unavailable("cache read failed".into()));
        }
        self.inner.query(filter).await
    }

    async fn count(&self) -> store::Result<usize> {
        self.inner.count().await
    }
}
