use std::sync::Arc;
use std::thread;

use msgstore::core::{MessageId, MessageReference};
use msgstore::storage::MessageStore;

use crate::fixture::{TestStore, reference};

fn refs(store: &MessageStore, ids: &[MessageId]) -> Vec<MessageReference> {
    ids.iter().map(|&id| reference(store, id, true)).collect()
}

#[test]
fn overlapping_batches_keep_counts_consistent() {
    let fixture = TestStore::new();
    let store = Arc::new(fixture.open());
    let first = refs(&store, &[5, 9]);
    let second = refs(&store, &[9, 12]);

    let workers: Vec<_> = [(1, first.clone()), (2, second.clone())]
        .into_iter()
        .map(|(channel, batch)| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for _ in 0..25 {
                    store.ledger().add_references(channel, &batch).unwrap();
                    store.ledger().remove_references(channel, &batch).unwrap();
                }
                store.ledger().add_references(channel, &batch).unwrap();
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert_eq!(first[0].message.persistent_channel_count(), 1);
    assert_eq!(first[1].message.persistent_channel_count(), 2);
    assert_eq!(second[1].message.persistent_channel_count(), 1);

    let stats = store.stats().unwrap();
    assert_eq!(stats.references, 4);
    assert_eq!(stats.messages, 3);
    for id in [5, 9, 12] {
        assert!(!store.locks().is_locked(id));
    }
}

#[test]
fn failed_batch_leaves_counts_untouched() {
    let fixture = TestStore::new();
    let store = fixture.open();
    let batch = refs(&store, &[1, 2, 3]);
    store.ledger().add_references(7, &batch[..2]).unwrap();

    // message 2 is already on channel 7, so the whole batch is rejected
    assert!(store.ledger().add_references(7, &batch[1..]).is_err());

    assert_eq!(batch[1].message.persistent_channel_count(), 1);
    assert_eq!(batch[2].message.persistent_channel_count(), 0);
    let stats = store.stats().unwrap();
    assert_eq!(stats.references, 2);
    assert_eq!(stats.messages, 2);
}
