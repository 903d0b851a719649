//! Digest sets: the sealed, ordered input of a reconciliation engine.
//!
//! A digest set holds `(created_at, id)` pairs of the local records selected
//! by a filter. Items are sorted by timestamp, ties broken by id. Once
//! sealed, the set is immutable: a further insertion is rejected with
//! [`CoreError::DigestSealed`] and leaves the set untouched.

use std::collections::HashSet;

use crate::error::{CoreError, Result};
use crate::record::Record;
use crate::types::{RecordId, Timestamp};

/// One entry of a digest set. Field order gives the sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DigestItem {
    pub created_at: Timestamp,
    pub id: RecordId,
}

/// Ordered `(created_at, id)` pairs.
#[derive(Debug, Clone, Default)]
pub struct DigestSet {
    items: Vec<DigestItem>,
    sealed: bool,
}

impl DigestSet {
    /// Create an empty, unsealed set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and seal a set from records. Duplicate ids collapse to one
    /// entry.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a Record>) -> Self {
        let mut set = Self::new();
        set.items.extend(records.into_iter().map(|r| DigestItem {
            created_at: r.created_at,
            id: r.id,
        }));
        set.seal();
        set
    }

    /// Add an item. Fails once the set is sealed.
    pub fn insert(&mut self, created_at: Timestamp, id: RecordId) -> Result<()> {
        if self.sealed {
            return Err(CoreError::DigestSealed(id.to_hex()));
        }
        self.items.push(DigestItem { created_at, id });
        Ok(())
    }

    /// Sort and freeze the set. Each id is kept once, at its earliest
    /// timestamp. Sealing twice is a no-op.
    pub fn seal(&mut self) {
        if self.sealed {
            return;
        }
        self.items.sort_unstable();
        let mut seen = HashSet::with_capacity(self.items.len());
        self.items.retain(|item| seen.insert(item.id));
        self.sealed = true;
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Items in order. Only meaningful after [`DigestSet::seal`].
    pub fn items(&self) -> &[DigestItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn contains(&self, id: &RecordId) -> bool {
        self.items.iter().any(|item| &item.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RecordBuilder;
    use crate::types::AuthorKey;
    use proptest::prelude::*;

    fn id(b: u8) -> RecordId {
        RecordId::from_bytes([b; 32])
    }

    #[test]
    fn test_seal_orders_by_time_then_id() {
        let mut set = DigestSet::new();
        set.insert(Timestamp(20), id(1)).unwrap();
        set.insert(Timestamp(10), id(9)).unwrap();
        set.insert(Timestamp(10), id(3)).unwrap();
        set.seal();

        let order: Vec<_> = set.items().iter().map(|i| (i.created_at.0, i.id)).collect();
        assert_eq!(order, vec![(10, id(3)), (10, id(9)), (20, id(1))]);
    }

    #[test]
    fn test_insert_after_seal_rejected() {
        let mut set = DigestSet::new();
        set.insert(Timestamp(1), id(1)).unwrap();
        set.seal();

        let err = set.insert(Timestamp(2), id(2)).unwrap_err();
        assert!(matches!(err, CoreError::DigestSealed(_)));
        assert_eq!(set.len(), 1);
        assert!(!set.contains(&id(2)));
    }

    #[test]
    fn test_from_records_collapses_duplicates() {
        let author = AuthorKey::from_bytes([7; 32]);
        let a = RecordBuilder::new(author, 7375).created_at(Timestamp(1)).build();
        let b = RecordBuilder::new(author, 7375).created_at(Timestamp(2)).build();
        let set = DigestSet::from_records([&a, &b, &a]);
        assert!(set.is_sealed());
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_seal_keeps_one_entry_per_id() {
        let mut set = DigestSet::new();
        set.insert(Timestamp(30), id(4)).unwrap();
        set.insert(Timestamp(10), id(4)).unwrap();
        set.insert(Timestamp(20), id(5)).unwrap();
        set.seal();

        let order: Vec<_> = set.items().iter().map(|i| (i.created_at.0, i.id)).collect();
        assert_eq!(order, vec![(10, id(4)), (20, id(5))]);
    }

    proptest! {
        #[test]
        fn prop_sealed_set_is_immutable(
            entries in prop::collection::vec((any::<u64>(), any::<[u8; 32]>()), 0..32),
            extra in (any::<u64>(), any::<[u8; 32]>()),
        ) {
            let mut set = DigestSet::new();
            for (ts, bytes) in &entries {
                set.insert(Timestamp(*ts), RecordId(*bytes)).unwrap();
            }
            set.seal();
            let before = set.items().to_vec();

            let result = set.insert(Timestamp(extra.0), RecordId(extra.1));
            prop_assert!(result.is_err());
            prop_assert_eq!(set.items(), &before[..]);

            set.seal();
            prop_assert_eq!(set.items(), &before[..]);
        }

        #[test]
        fn prop_sealed_set_is_sorted_and_unique(
            entries in prop::collection::vec((0u64..8, 0u8..8), 0..64),
        ) {
            let mut set = DigestSet::new();
            for (ts, b) in &entries {
                set.insert(Timestamp(*ts), RecordId([*b; 32])).unwrap();
            }
            set.seal();
            prop_assert!(set.items().windows(2).all(|w| w[0] < w[1]));
            let ids: HashSet<_> = set.items().iter().map(|i| i.id).collect();
            prop_assert_eq!(ids.len(), set.len());
        }
    }
}
