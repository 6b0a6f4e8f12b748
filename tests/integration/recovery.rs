use msgstore::core::{HeaderValue, Message, MessageReference, Transaction, TxState, Xid};
use msgstore::storage::{StoreStats, WriteMode};

use crate::fixture::{TestStore, reference};

fn xid() -> Xid {
    Xid::new(0x1234, b"global".to_vec(), b"branch".to_vec())
}

fn prepare_mixed(fixture: &TestStore) {
    let store = fixture.open();
    let ledger = store.ledger();
    let kept = reference(&store, 1, true);
    ledger.add_reference(10, &kept, None).unwrap();

    let mut tx = Transaction::with_xid(500, xid());
    let added = reference(&store, 2, true);
    ledger.add_reference(10, &added, Some(&mut tx)).unwrap();
    ledger.add_reference(11, &added, Some(&mut tx)).unwrap();
    ledger.remove_reference(10, &kept, Some(&mut tx)).unwrap();
    tx.prepare().unwrap();
}

#[test]
fn prepared_transaction_survives_restart_and_commits() {
    for mode in [WriteMode::RowAtATime, WriteMode::Batched] {
        let fixture = TestStore::with_mode(mode);
        prepare_mixed(&fixture);

        let store = fixture.open();
        let prepared = store.transactions().retrieve_prepared_transactions().unwrap();
        assert_eq!(prepared.len(), 1);
        assert_eq!(prepared[0].transaction_id, 500);
        assert_eq!(prepared[0].xid, xid());

        let mut tx = Transaction::recovered(500, prepared[0].xid.clone());
        store.transactions().recover(&mut tx).unwrap();
        tx.commit().unwrap();
        assert_eq!(tx.state(), TxState::Committed);

        let stats = store.stats().unwrap();
        assert_eq!(stats.references, 2, "{mode:?}");
        assert_eq!(stats.messages, 1, "{mode:?}");
        assert_eq!(stats.pending_adds, 0);
        assert_eq!(stats.pending_removes, 0);
        assert_eq!(stats.prepared_transactions, 0);

        let handles = store.ledger().get_messages(&[2]).unwrap();
        assert_eq!(handles[0].persistent_channel_count(), 2);
    }
}

#[test]
fn prepared_transaction_survives_restart_and_rolls_back() {
    let fixture = TestStore::new();
    prepare_mixed(&fixture);

    let store = fixture.open();
    let mut tx = Transaction::recovered(500, xid());
    store.transactions().recover(&mut tx).unwrap();
    tx.rollback().unwrap();

    let stats = store.stats().unwrap();
    assert_eq!(stats.references, 1);
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.pending_removes, 0);
    assert_eq!(stats.prepared_transactions, 0);

    let handles = store.ledger().get_messages(&[1, 2]).unwrap();
    assert_eq!(handles.len(), 1);
    assert_eq!(handles[0].id(), 1);
    assert_eq!(handles[0].persistent_channel_count(), 1);
}

#[test]
fn recovering_an_active_transaction_is_rejected() {
    let fixture = TestStore::new();
    let store = fixture.open();
    let mut tx = Transaction::with_xid(1, xid());
    assert!(store.transactions().recover(&mut tx).is_err());
}

#[test]
fn message_content_survives_restart() {
    let fixture = TestStore::new();
    let original = Message::new(77, true)
        .with_priority(9)
        .with_expiration(1_700_000_000_000)
        .with_header("kind", HeaderValue::Text("order".into()))
        .with_header("retries", HeaderValue::Int(3))
        .with_header("blob", HeaderValue::Bytes(vec![0, 1, 2, 255]))
        .with_payload(vec![7u8; 64 * 1024]);
    {
        let store = fixture.open();
        let reference = MessageReference::new(store.ledger().message_handle(original.clone()).unwrap());
        store.ledger().add_reference(3, &reference, None).unwrap();
    }

    let store = fixture.open();
    let loaded = store.ledger().get_messages(&[77]).unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].message(), &original);
    assert_eq!(loaded[0].persistent_channel_count(), 1);
}

#[test]
fn unreliable_references_are_purged_on_reopen() {
    let fixture = TestStore::new();
    {
        let store = fixture.open();
        let ledger = store.ledger();
        let durable = reference(&store, 1, true);
        let transient = reference(&store, 2, false);
        ledger.add_reference(4, &durable, None).unwrap();
        ledger.add_reference(4, &transient, None).unwrap();
        ledger.add_reference(5, &transient, None).unwrap();
    }

    let store = fixture.open();
    let report = store.purge_report();
    assert_eq!(report.references_removed, 2);
    assert_eq!(report.messages_removed, 1);
    assert_eq!(
        store.stats().unwrap(),
        StoreStats {
            messages: 1,
            references: 1,
            ..StoreStats::default()
        }
    );
}

#[test]
fn non_finite_float_headers_load_with_their_neighbours() {
    let fixture = TestStore::new();
    {
        let store = fixture.open();
        let ledger = store.ledger();
        let plain = MessageReference::new(ledger.message_handle(Message::new(1, true)).unwrap());
        let odd = MessageReference::new(ledger.message_handle(
            Message::new(2, true)
                .with_header("limit", HeaderValue::Float(f64::INFINITY))
                .with_header("score", HeaderValue::Float(f64::NAN)),
        ).unwrap());
        ledger.add_references(6, &[plain, odd]).unwrap();
    }

    let store = fixture.open();
    let mut loaded = store.ledger().get_messages(&[1, 2]).unwrap();
    loaded.sort_by_key(|handle| handle.id());
    assert_eq!(loaded.len(), 2);
    let headers = &loaded[1].message().headers;
    assert_eq!(headers["limit"], HeaderValue::Float(f64::INFINITY));
    assert_eq!(headers["score"], HeaderValue::Float(f64::NAN));
}
