//! Records: the content-addressed unit being reconciled.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::types::{AuthorKey, RecordId, Timestamp};

/// Domain separator mixed into every record id.
const ID_DOMAIN: &[u8] = b"negsync-record-v0:";

/// A domain record.
///
/// Reconciliation only looks at `id` and `created_at`. The remaining fields
/// exist for filter matching and for publishing the record to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub author: AuthorKey,
    pub kind: u32,
    pub created_at: Timestamp,
    /// Tag rows, e.g. `["p", "<hex>"]`. The first element is the tag name.
    pub tags: Vec<Vec<String>>,
    pub payload: Bytes,
}

impl Record {
    /// Recompute the content address from the record's fields.
    pub fn compute_id(&self) -> RecordId {
        compute_id(
            &self.author,
            self.kind,
            self.created_at,
            &self.tags,
            &self.payload,
        )
    }

    /// Check that `id` matches the content.
    pub fn verify_id(&self) -> bool {
        self.id == self.compute_id()
    }

    /// Values of every tag named `name`.
    pub fn tag_values<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.tags
            .iter()
            .filter(move |row| row.first().map(String::as_str) == Some(name))
            .filter_map(|row| row.get(1).map(String::as_str))
    }
}

fn compute_id(
    author: &AuthorKey,
    kind: u32,
    created_at: Timestamp,
    tags: &[Vec<String>],
    payload: &[u8],
) -> RecordId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(ID_DOMAIN);
    hasher.update(&author.0);
    hasher.update(&kind.to_be_bytes());
    hasher.update(&created_at.as_secs().to_be_bytes());
    hasher.update(&(tags.len() as u64).to_be_bytes());
    for row in tags {
        hasher.update(&(row.len() as u64).to_be_bytes());
        for value in row {
            hasher.update(&(value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }
    }
    hasher.update(&(payload.len() as u64).to_be_bytes());
    hasher.update(payload);
    RecordId(*hasher.finalize().as_bytes())
}

/// Builder for records. The id is derived on [`RecordBuilder::build`].
#[derive(Debug, Clone)]
pub struct RecordBuilder {
    author: AuthorKey,
    kind: u32,
    created_at: Timestamp,
    tags: Vec<Vec<String>>,
    payload: Bytes,
}

impl RecordBuilder {
    pub fn new(author: AuthorKey, kind: u32) -> Self {
        Self {
            author,
            kind,
            created_at: Timestamp::default(),
            tags: Vec::new(),
            payload: Bytes::new(),
        }
    }

    pub fn created_at(mut self, created_at: Timestamp) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn tag(mut self, name: &str, value: &str) -> Self {
        self.tags.push(vec![name.to_string(), value.to_string()]);
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn build(self) -> Record {
        let id = compute_id(
            &self.author,
            self.kind,
            self.created_at,
            &self.tags,
            &self.payload,
        );
        Record {
            id,
            author: self.author,
            kind: self.kind,
            created_at: self.created_at,
            tags: self.tags,
            payload: self.payload,
        }
    }
}
