//! Property-based tests for the reference ledger: channel counts always
//! match the references actually stored, including after rejected writes
//! and after transactions end either way.

use std::collections::{BTreeMap, BTreeSet};

use proptest::prelude::*;

use msgstore::core::{ChannelId, Message, MessageId, MessageReference, Transaction, Xid};
use msgstore::storage::{MessageStore, StoreSettings, WriteMode};

#[derive(Debug, Clone, Copy)]
enum Outcome {
    OnePhaseCommit,
    OnePhaseRollback,
    PrepareCommit,
    PrepareRollback,
}

impl Outcome {
    const fn commits(self) -> bool {
        matches!(self, Self::OnePhaseCommit | Self::PrepareCommit)
    }

    const fn prepares(self) -> bool {
        matches!(self, Self::PrepareCommit | Self::PrepareRollback)
    }
}

#[derive(Debug, Clone)]
enum Op {
    Add(ChannelId, MessageId),
    Remove(ChannelId, MessageId),
    AddBatch(ChannelId, Vec<MessageId>),
    Tx {
        adds: Vec<(ChannelId, MessageId)>,
        removes: Vec<(ChannelId, MessageId)>,
        outcome: Outcome,
    },
    /// One transaction adding the same message to two channels.
    SpreadTx {
        message: MessageId,
        channels: (ChannelId, ChannelId),
        outcome: Outcome,
    },
}

type Model = BTreeSet<(ChannelId, MessageId)>;

fn arb_outcome() -> impl Strategy<Value = Outcome> {
    prop_oneof![
        Just(Outcome::OnePhaseCommit),
        Just(Outcome::OnePhaseRollback),
        Just(Outcome::PrepareCommit),
        Just(Outcome::PrepareRollback),
    ]
}

fn arb_pairs() -> impl Strategy<Value = Vec<(ChannelId, MessageId)>> {
    prop::collection::vec((0..3i64, 0..6i64), 0..5)
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0..3i64, 0..6i64).prop_map(|(c, m)| Op::Add(c, m)),
        2 => (0..3i64, 0..6i64).prop_map(|(c, m)| Op::Remove(c, m)),
        1 => (0..3i64, prop::collection::btree_set(0..6i64, 1..4))
            .prop_map(|(c, ms)| Op::AddBatch(c, ms.into_iter().collect())),
        2 => (arb_pairs(), arb_pairs(), arb_outcome())
            .prop_map(|(adds, removes, outcome)| Op::Tx { adds, removes, outcome }),
        1 => (0..6i64, 0..3i64, 1..3i64, arb_outcome()).prop_map(|(message, a, step, outcome)| {
            Op::SpreadTx { message, channels: (a, (a + step) % 3), outcome }
        }),
    ]
}

/// Keep only work a broker would hand the store: adds of absent
/// references and removes of present ones, each pair at most once.
fn valid_work(
    model: &Model,
    adds: &[(ChannelId, MessageId)],
    removes: &[(ChannelId, MessageId)],
) -> (Vec<(ChannelId, MessageId)>, Vec<(ChannelId, MessageId)>) {
    let mut seen = BTreeSet::new();
    let adds: Vec<_> = adds
        .iter()
        .copied()
        .filter(|pair| !model.contains(pair) && seen.insert(*pair))
        .collect();
    let removes: Vec<_> = removes
        .iter()
        .copied()
        .filter(|pair| model.contains(pair) && seen.insert(*pair))
        .collect();
    (adds, removes)
}

fn run_transaction(
    store: &MessageStore,
    handles: &BTreeMap<MessageId, MessageReference>,
    tx_id: i64,
    adds: &[(ChannelId, MessageId)],
    removes: &[(ChannelId, MessageId)],
    outcome: Outcome,
) -> msgstore::Result<()> {
    let ledger = store.ledger();
    let mut tx = Transaction::with_xid(tx_id, Xid::new(1, tx_id.to_be_bytes().to_vec(), vec![]));
    for (channel, id) in adds {
        ledger.add_reference(*channel, &handles[id], Some(&mut tx))?;
    }
    for (channel, id) in removes {
        ledger.remove_reference(*channel, &handles[id], Some(&mut tx))?;
    }
    if outcome.prepares() {
        tx.prepare()?;
    }
    if outcome.commits() {
        tx.commit()
    } else {
        tx.rollback()
    }
}

fn apply(model: &mut Model, adds: &[(ChannelId, MessageId)], removes: &[(ChannelId, MessageId)]) {
    model.extend(adds.iter().copied());
    for pair in removes {
        model.remove(pair);
    }
}

fn arb_mode() -> impl Strategy<Value = WriteMode> {
    prop_oneof![Just(WriteMode::RowAtATime), Just(WriteMode::Batched)]
}

fn count_in(model: &Model, id: MessageId) -> u32 {
    u32::try_from(model.iter().filter(|(_, m)| *m == id).count()).unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn channel_counts_track_stored_references(
        mode in arb_mode(),
        ops in prop::collection::vec(arb_op(), 1..30),
    ) {
        let store = MessageStore::in_memory(StoreSettings {
            write_mode: mode,
            ..StoreSettings::default()
        })
        .unwrap();
        let ledger = store.ledger();
        let handles: BTreeMap<MessageId, MessageReference> = (0..6)
            .map(|id| (id, MessageReference::new(ledger.message_handle(Message::new(id, true)).unwrap())))
            .collect();
        let mut model = Model::new();
        let mut next_tx = 1;

        for op in ops {
            match op {
                Op::Add(channel, id) => {
                    let result = ledger.add_reference(channel, &handles[&id], None);
                    prop_assert_eq!(result.is_ok(), model.insert((channel, id)));
                }
                Op::Remove(channel, id) => {
                    let result = ledger.remove_reference(channel, &handles[&id], None);
                    prop_assert_eq!(result.is_ok(), model.remove(&(channel, id)));
                }
                Op::AddBatch(channel, ids) => {
                    let refs: Vec<MessageReference> =
                        ids.iter().map(|id| handles[id].clone()).collect();
                    let fresh = ids.iter().all(|id| !model.contains(&(channel, *id)));
                    let result = ledger.add_references(channel, &refs);
                    prop_assert_eq!(result.is_ok(), fresh);
                    if fresh {
                        model.extend(ids.iter().map(|id| (channel, *id)));
                    }
                }
                Op::Tx { adds, removes, outcome } => {
                    let (adds, removes) = valid_work(&model, &adds, &removes);
                    next_tx += 1;
                    run_transaction(&store, &handles, next_tx, &adds, &removes, outcome).unwrap();
                    if outcome.commits() {
                        apply(&mut model, &adds, &removes);
                    }
                }
                Op::SpreadTx { message, channels: (a, b), outcome } => {
                    let spread = [(a, message), (b, message)];
                    let removes: Vec<_> = model
                        .iter()
                        .copied()
                        .filter(|(_, id)| *id != message)
                        .take(1)
                        .collect();
                    let (adds, removes) = valid_work(&model, &spread, &removes);
                    next_tx += 1;
                    run_transaction(&store, &handles, next_tx, &adds, &removes, outcome).unwrap();
                    if outcome.commits() {
                        apply(&mut model, &adds, &removes);
                    }
                }
            }

            for (id, reference) in &handles {
                prop_assert_eq!(reference.message.persistent_channel_count(), count_in(&model, *id));
            }
        }

        let stats = store.stats().unwrap();
        let live = handles.keys().filter(|id| count_in(&model, **id) > 0).count();
        prop_assert_eq!(stats.references, u64::try_from(model.len()).unwrap());
        prop_assert_eq!(stats.messages, u64::try_from(live).unwrap());
        prop_assert_eq!(stats.pending_adds, 0);
        prop_assert_eq!(stats.pending_removes, 0);
        prop_assert_eq!(stats.prepared_transactions, 0);
    }
}
