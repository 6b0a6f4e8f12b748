use msgstore::core::{Message, MessageReference, Transaction, Xid};
use msgstore::storage::{MessageStore, StoreStats, WriteMode};

use crate::fixture::{TestStore, reference};

/// Drive the same workload through a store and report where it ends up.
fn run_workload(store: &MessageStore) -> (StoreStats, Vec<(i64, u32)>) {
    let ledger = store.ledger();
    let refs: Vec<MessageReference> = (1..=12).map(|id| reference(store, id, id % 3 != 0)).collect();
    ledger.add_references(1, &refs[..8]).unwrap();
    ledger.add_references(2, &refs[4..]).unwrap();
    ledger.remove_references(1, &refs[..3]).unwrap();

    let mut tx = Transaction::with_xid(9, Xid::new(1, vec![1], vec![2]));
    ledger.add_reference(3, &refs[0], Some(&mut tx)).unwrap();
    ledger.remove_reference(2, &refs[11], Some(&mut tx)).unwrap();
    tx.prepare().unwrap();
    tx.commit().unwrap();

    let mut one_phase = Transaction::new(10);
    let extra = MessageReference::new(ledger.message_handle(Message::new(40, true)).unwrap());
    ledger.add_reference(3, &extra, Some(&mut one_phase)).unwrap();
    ledger.remove_reference(1, &refs[3], Some(&mut one_phase)).unwrap();
    one_phase.commit().unwrap();

    store.paging().get_initial_reference_infos(2, 3).unwrap();

    let ids: Vec<i64> = (1..=12).chain([40]).collect();
    let mut counts: Vec<(i64, u32)> = ledger
        .get_messages(&ids)
        .unwrap()
        .iter()
        .map(|handle| (handle.id(), handle.persistent_channel_count()))
        .collect();
    counts.sort_unstable();
    (store.stats().unwrap(), counts)
}

#[test]
fn batched_and_row_modes_reach_the_same_state() {
    let row = TestStore::with_mode(WriteMode::RowAtATime);
    let batched = TestStore::with_mode(WriteMode::Batched);

    let (row_stats, row_counts) = run_workload(&row.open());
    let (batched_stats, batched_counts) = run_workload(&batched.open());

    assert_eq!(row_stats, batched_stats);
    assert_eq!(row_counts, batched_counts);
    assert_eq!(row_stats.paged_references, 4);
    assert_eq!(row_stats.messages, 9);
    assert_eq!(row_stats.references, 13);
    assert!(row_counts.contains(&(40, 1)));
    assert!(!row_counts.iter().any(|&(id, _)| id == 12));
}

#[test]
fn reopened_counts_match_live_counts() {
    let fixture = TestStore::with_mode(WriteMode::Batched);
    let live = {
        let store = fixture.open();
        run_workload(&store).1
    };
    let store = fixture.open();
    let ids: Vec<i64> = live.iter().map(|&(id, _)| id).collect();
    let mut reopened: Vec<(i64, u32)> = store
        .ledger()
        .get_messages(&ids)
        .unwrap()
        .iter()
        .map(|handle| (handle.id(), handle.persistent_channel_count()))
        .collect();
    reopened.sort_unstable();

    // unreliable references are purged on reopen
    let expected: Vec<(i64, u32)> = live.into_iter().filter(|&(id, _)| id % 3 != 0).collect();
    assert_eq!(reopened, expected);
}
