//! Proptest generators for property-based testing.

use proptest::prelude::*;

use negsync_core::{kinds, AuthorKey, Record, RecordBuilder, RecordId, Timestamp};

/// Generate a random RecordId.
pub fn record_id() -> impl Strategy<Value = RecordId> {
    any::<[u8; 32]>().prop_map(RecordId::from_bytes)
}

/// Generate a random AuthorKey.
pub fn author_key() -> impl Strategy<Value = AuthorKey> {
    any::<[u8; 32]>().prop_map(AuthorKey::from_bytes)
}

/// Generate a plausible creation time.
pub fn timestamp() -> impl Strategy<Value = Timestamp> {
    (0u64..=2_000_000_000).prop_map(Timestamp::from_secs)
}

/// Generate one of the wallet record kinds.
pub fn wallet_kind() -> impl Strategy<Value = u32> {
    prop_oneof![
        Just(kinds::TOKEN),
        Just(kinds::DELETION),
        Just(kinds::WALLET),
        Just(kinds::HISTORY),
    ]
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// Parameters for generating a record.
#[derive(Debug, Clone)]
pub struct RecordParams {
    pub author: AuthorKey,
    pub kind: u32,
    pub created_at: Timestamp,
    pub payload: Vec<u8>,
}

impl Arbitrary for RecordParams {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (
            author_key(),
            prop_oneof![wallet_kind(), 0u32..=40_000],
            timestamp(),
            payload(256),
        )
            .prop_map(|(author, kind, created_at, payload)| RecordParams {
                author,
                kind,
                created_at,
                payload,
            })
            .boxed()
    }
}

/// Generate a record from parameters.
pub fn record_from_params(params: &RecordParams) -> Record {
    RecordBuilder::new(params.author, params.kind)
        .created_at(params.created_at)
        .payload(params.payload.clone())
        .build()
}

/// Generate `0..max` distinct wallet records by one author.
pub fn wallet_records(author: AuthorKey, max: usize) -> impl Strategy<Value = Vec<Record>> {
    prop::collection::btree_set((wallet_kind(), 0u64..100_000), 0..max).prop_map(move |keys| {
        keys.into_iter()
            .map(|(kind, at)| {
                RecordBuilder::new(author, kind)
                    .created_at(Timestamp::from_secs(at))
                    .build()
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_record_id_deterministic(params: RecordParams) {
            let r1 = record_from_params(&params);
            let r2 = record_from_params(&params);
            prop_assert_eq!(r1.id, r2.id);
            prop_assert!(r1.verify_id());
        }

        #[test]
        fn test_record_id_unique_with_different_payload(
            author in author_key(),
            p1 in payload(100),
            p2 in payload(100),
        ) {
            prop_assume!(p1 != p2);

            let r1 = RecordBuilder::new(author, kinds::TOKEN).payload(p1).build();
            let r2 = RecordBuilder::new(author, kinds::TOKEN).payload(p2).build();
            prop_assert_ne!(r1.id, r2.id);
        }

        #[test]
        fn test_wallet_records_distinct(records in wallet_records(AuthorKey::from_bytes([3; 32]), 30)) {
            let ids: std::collections::HashSet<_> = records.iter().map(|r| r.id).collect();
            prop_assert_eq!(ids.len(), records.len());
        }
    }
}
