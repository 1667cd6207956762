use plume_core::{AuthorId, RecordSignature};
use proptest::prelude::*;

use super::*;

fn record(n: u8, created_at: u64) -> Record {
    Record::builder()
        .id(RecordId::from_bytes([n; 32]))
        .author(AuthorId::from_bytes([n; 32]))
        .created_at(Timestamp(created_at))
        .content(format!("record {n}"))
        .sig(RecordSignature::from_bytes([1; 64]))
        .build()
}

fn timestamps(store: &NoteStore) -> Vec<u64> {
    store.records().iter().map(|r| r.created_at.0).collect()
}

fn ids(store: &NoteStore) -> Vec<RecordId> {
    store.records().iter().map(|r| r.id).collect()
}

#[test]
fn append_inserts_at_sort_position() {
    let mut store = NoteStore::new();
    let filter = FilterConfig::default();

    for (n, ts) in [(1, 100), (2, 300), (3, 200)] {
        store.merge([record(n, ts)], MergeMode::Append, &filter);
    }

    assert_eq!(timestamps(&store), vec![300, 200, 100]);
    assert_eq!(store.newest_timestamp(), Some(Timestamp(300)));
    assert_eq!(store.oldest_timestamp(), Some(Timestamp(100)));
    assert_eq!(store.oldest_count(), 1);

    store.merge([record(4, 100), record(5, 50)], MergeMode::Append, &filter);
    assert_eq!(store.oldest_count(), 1);
    store.merge([record(6, 50)], MergeMode::Append, &filter);
    assert_eq!(store.oldest_count(), 2);
    assert_eq!(NoteStore::new().oldest_count(), 0);
}

#[test]
fn equal_timestamps_keep_admission_order() {
    let mut store = NoteStore::new();
    let filter = FilterConfig::default();

    store.merge([record(1, 100), record(2, 100)], MergeMode::Append, &filter);
    store.merge([record(3, 100)], MergeMode::Append, &filter);

    assert_eq!(
        ids(&store),
        vec![
            RecordId::from_bytes([1; 32]),
            RecordId::from_bytes([2; 32]),
            RecordId::from_bytes([3; 32]),
        ]
    );

    let mut replaced = NoteStore::new();
    replaced.merge(
        [record(4, 100), record(5, 200), record(6, 100)],
        MergeMode::Replace,
        &filter,
    );
    assert_eq!(
        ids(&replaced),
        vec![
            RecordId::from_bytes([5; 32]),
            RecordId::from_bytes([4; 32]),
            RecordId::from_bytes([6; 32]),
        ]
    );
}

#[test]
fn replace_discards_previous_content() {
    let mut store = NoteStore::new();
    let filter = FilterConfig::default();

    store.merge([record(1, 1), record(2, 2)], MergeMode::Append, &filter);
    let admitted = store.merge([record(2, 2), record(3, 3), record(3, 3)], MergeMode::Replace, &filter);

    assert_eq!(admitted.len(), 2);
    assert_eq!(timestamps(&store), vec![3, 2]);
    assert!(!store.contains(&RecordId::from_bytes([1; 32])));
}

#[test]
fn duplicates_are_admitted_once() {
    let mut store = NoteStore::new();
    let filter = FilterConfig::default();

    let first = store.merge([record(1, 10)], MergeMode::Append, &filter);
    let second = store.merge([record(1, 10)], MergeMode::Append, &filter);

    assert_eq!(first.len(), 1);
    assert!(second.is_empty());
    assert_eq!(store.len(), 1);
}

#[test]
fn filtered_records_are_never_admitted() {
    let mut store = NoteStore::new();
    let filter = FilterConfig::builder()
        .muted_authors(vec![AuthorId::from_bytes([2; 32])])
        .build();

    let admitted = store.merge([record(1, 1), record(2, 2)], MergeMode::Append, &filter);

    assert_eq!(admitted.len(), 1);
    assert!(!store.contains(&RecordId::from_bytes([2; 32])));
}

#[test]
fn visible_refilters_without_mutation() {
    let mut store = NoteStore::new();
    store.merge([record(1, 1), record(2, 2)], MergeMode::Append, &FilterConfig::default());

    let stricter = FilterConfig::builder()
        .muted_authors(vec![AuthorId::from_bytes([1; 32])])
        .build();

    assert_eq!(store.visible(&stricter).len(), 1);
    assert_eq!(store.len(), 2);
    assert!(store.get(&RecordId::from_bytes([1; 32])).is_some());
}

fn arb_batch() -> impl Strategy<Value = Vec<(u8, u64)>> {
    prop::collection::vec((0u8..32, 0u64..20), 0..40)
}

proptest! {
    #[test]
    fn merges_keep_store_unique_and_sorted(
        batches in prop::collection::vec((arb_batch(), any::<bool>()), 1..6)
    ) {
        let mut store = NoteStore::new();
        let filter = FilterConfig::default();

        for (batch, replace) in batches {
            let mode = if replace { MergeMode::Replace } else { MergeMode::Append };
            store.merge(batch.iter().map(|(n, ts)| record(*n, *ts)), mode, &filter);

            let ts = timestamps(&store);
            prop_assert!(ts.windows(2).all(|w| w[1] <= w[0]));

            let unique: HashSet<RecordId> = ids(&store).into_iter().collect();
            prop_assert_eq!(unique.len(), store.len());
        }
    }

    #[test]
    fn append_is_idempotent(batch in arb_batch(), preexisting in arb_batch()) {
        let mut store = NoteStore::new();
        let filter = FilterConfig::default();

        store.merge(preexisting.iter().map(|(n, ts)| record(*n, *ts)), MergeMode::Append, &filter);
        store.merge(batch.iter().map(|(n, ts)| record(*n, *ts)), MergeMode::Append, &filter);
        let after_first = ids(&store);

        let admitted = store.merge(batch.iter().map(|(n, ts)| record(*n, *ts)), MergeMode::Append, &filter);

        prop_assert!(admitted.is_empty());
        prop_assert_eq!(ids(&store), after_first);
    }
}
