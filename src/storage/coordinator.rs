//! Transaction coordinator: one- and two-phase persistence of the reference
//! adds and removes a broker transaction accumulated.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use super::StoreContext;
use super::backend::Statement;
use super::ledger::{
    load_handles, stage_decrement, stage_reference_add, stage_reference_remove,
};
use crate::core::{
    ChannelId, MessageId, MessageReference, PreparedTransaction, RefState, Transaction,
    TransactionId, TxCallback, TxState, Xid,
};
use crate::error::{Result, StoreError};

/// Key under which the store callback is registered on a transaction.
pub const STORE_CALLBACK_KEY: &str = "msgstore.persistence";

#[derive(Debug, Default)]
struct PendingWork {
    adds: Vec<(ChannelId, MessageReference)>,
    removes: Vec<(ChannelId, MessageReference)>,
}

impl PendingWork {
    fn is_empty(&self) -> bool {
        self.adds.is_empty() && self.removes.is_empty()
    }

    /// Both lists sorted by message id, then channel.
    fn sorted(&self) -> (Vec<(ChannelId, MessageReference)>, Vec<(ChannelId, MessageReference)>) {
        let sort = |list: &[(ChannelId, MessageReference)]| {
            let mut list = list.to_vec();
            list.sort_by_key(|(channel, reference)| (reference.message_id(), *channel));
            list
        };
        (sort(&self.adds), sort(&self.removes))
    }
}

fn message_ids<'a>(
    lists: impl IntoIterator<Item = &'a [(ChannelId, MessageReference)]>,
) -> Vec<MessageId> {
    lists
        .into_iter()
        .flatten()
        .map(|(_, reference)| reference.message_id())
        .collect()
}

fn expect_rows(what: &str, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::Consistency(format!(
            "{what} affected {actual} rows, expected {expected}"
        )))
    }
}

/// Store-side participant of one broker transaction.
pub struct StoreTxCallback {
    ctx: Arc<StoreContext>,
    transaction_id: TransactionId,
    xid: Option<Xid>,
    work: Mutex<PendingWork>,
}

impl std::fmt::Debug for StoreTxCallback {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let work = self.work.lock();
        f.debug_struct("StoreTxCallback")
            .field("transaction_id", &self.transaction_id)
            .field("xid", &self.xid)
            .field("adds", &work.adds.len())
            .field("removes", &work.removes.len())
            .finish_non_exhaustive()
    }
}

impl StoreTxCallback {
    pub(crate) fn new(ctx: Arc<StoreContext>, transaction_id: TransactionId, xid: Option<Xid>) -> Self {
        Self {
            ctx,
            transaction_id,
            xid,
            work: Mutex::new(PendingWork::default()),
        }
    }

    pub(crate) fn record_add(&self, channel_id: ChannelId, reference: MessageReference) {
        self.work.lock().adds.push((channel_id, reference));
    }

    pub(crate) fn record_remove(&self, channel_id: ChannelId, reference: MessageReference) {
        self.work.lock().removes.push((channel_id, reference));
    }

    fn replace_work(&self, work: PendingWork) {
        *self.work.lock() = work;
    }

    pub fn pending_adds(&self) -> usize {
        self.work.lock().adds.len()
    }

    pub fn pending_removes(&self) -> usize {
        self.work.lock().removes.len()
    }

    fn snapshot(&self) -> Option<(Vec<(ChannelId, MessageReference)>, Vec<(ChannelId, MessageReference)>)> {
        let work = self.work.lock();
        if work.is_empty() {
            None
        } else {
            Some(work.sorted())
        }
    }

    fn finish(&self) {
        *self.work.lock() = PendingWork::default();
    }

    fn commit_one_phase(
        &self,
        adds: &[(ChannelId, MessageReference)],
        removes: &[(ChannelId, MessageReference)],
    ) -> Result<()> {
        self.ctx.write_locked(
            "commit_one_phase",
            message_ids([adds, removes]),
            |tx, counts| {
                let mut batch = self.ctx.batch(tx);
                for (channel_id, reference) in adds {
                    stage_reference_add(
                        &mut batch,
                        counts,
                        *channel_id,
                        reference,
                        RefState::Committed,
                        None,
                    )?;
                }
                batch.flush()?;
                for (channel_id, reference) in removes {
                    stage_reference_remove(&mut batch, counts, *channel_id, reference)?;
                }
                batch.flush()
            },
        )
    }

    fn commit_two_phase(
        &self,
        adds: &[(ChannelId, MessageReference)],
        removes: &[(ChannelId, MessageReference)],
    ) -> Result<()> {
        let id = self.transaction_id;
        self.ctx.write_locked(
            "commit_two_phase",
            message_ids([adds, removes]),
            |tx, counts| {
                expect_rows("commit of pending adds", adds.len(), tx.commit_pending_adds(id)?)?;
                expect_rows(
                    "delete of pending removes",
                    removes.len(),
                    tx.delete_pending_removes(id)?,
                )?;
                expect_rows("delete of transaction record", 1, tx.delete_transaction(id)?)?;

                let mut batch = self.ctx.batch(tx);
                for (_, reference) in removes {
                    stage_decrement(&mut batch, counts, &reference.message)?;
                }
                batch.flush()
            },
        )
    }

    fn rollback_two_phase(
        &self,
        adds: &[(ChannelId, MessageReference)],
        removes: &[(ChannelId, MessageReference)],
    ) -> Result<()> {
        let id = self.transaction_id;
        self.ctx.write_locked(
            "rollback_two_phase",
            message_ids([adds, removes]),
            |tx, counts| {
                expect_rows("delete of pending adds", adds.len(), tx.delete_pending_adds(id)?)?;
                expect_rows(
                    "restore of pending removes",
                    removes.len(),
                    tx.restore_pending_removes(id)?,
                )?;
                expect_rows("delete of transaction record", 1, tx.delete_transaction(id)?)?;

                let mut batch = self.ctx.batch(tx);
                for (_, reference) in adds {
                    stage_decrement(&mut batch, counts, &reference.message)?;
                }
                batch.flush()
            },
        )
    }
}

impl TxCallback for StoreTxCallback {
    fn before_prepare(&self) -> Result<()> {
        let Some((adds, removes)) = self.snapshot() else {
            return Ok(());
        };
        let xid = self.xid.as_ref().ok_or_else(|| {
            StoreError::InvalidArgument(format!(
                "transaction {} has work to prepare but no xid",
                self.transaction_id
            ))
        })?;
        let id = self.transaction_id;
        debug!(tx = id, adds = adds.len(), removes = removes.len(), "preparing store work");

        self.ctx
            .write_locked("prepare", message_ids([&adds[..], &removes[..]]), |tx, counts| {
                expect_rows("insert of transaction record", 1, tx.insert_transaction(id, xid)?)?;
                let mut batch = self.ctx.batch(tx);
                for (channel_id, reference) in &adds {
                    stage_reference_add(
                        &mut batch,
                        counts,
                        *channel_id,
                        reference,
                        RefState::PendingAdd,
                        Some(id),
                    )?;
                }
                for (channel_id, reference) in &removes {
                    batch.add(Statement::MarkReferenceRemoving {
                        channel_id: *channel_id,
                        message_id: reference.message_id(),
                        transaction_id: id,
                    })?;
                }
                batch.flush()
            })
    }

    fn before_commit(&self, one_phase: bool) -> Result<()> {
        let Some((adds, removes)) = self.snapshot() else {
            return Ok(());
        };
        debug!(
            tx = self.transaction_id,
            one_phase,
            adds = adds.len(),
            removes = removes.len(),
            "committing store work"
        );
        if one_phase {
            self.commit_one_phase(&adds, &removes)?;
        } else {
            self.commit_two_phase(&adds, &removes)?;
        }
        self.finish();
        Ok(())
    }

    fn before_rollback(&self, one_phase: bool) -> Result<()> {
        if one_phase {
            self.finish();
            return Ok(());
        }
        let Some((adds, removes)) = self.snapshot() else {
            return Ok(());
        };
        debug!(
            tx = self.transaction_id,
            adds = adds.len(),
            removes = removes.len(),
            "rolling back prepared store work"
        );
        self.rollback_two_phase(&adds, &removes)?;
        self.finish();
        Ok(())
    }
}

/// Entry point for transaction recovery after a restart.
#[derive(Debug, Clone)]
pub struct TransactionCoordinator {
    ctx: Arc<StoreContext>,
}

impl TransactionCoordinator {
    pub(crate) const fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    /// Every transaction that is durably prepared.
    pub fn retrieve_prepared_transactions(&self) -> Result<Vec<PreparedTransaction>> {
        self.ctx.read(|tx| tx.select_prepared_transactions())
    }

    /// Rebind a prepared transaction to the rows tagged with its id so that
    /// a later commit or rollback completes the protocol.
    pub fn recover(&self, transaction: &mut Transaction) -> Result<()> {
        if transaction.state() != TxState::Prepared {
            return Err(StoreError::InvalidTransactionState {
                id: transaction.id(),
                state: transaction.state().to_string(),
                action: "recover".to_string(),
            });
        }
        let id = transaction.id();

        let work = self.ctx.read(|tx| {
            let tagged = tx.load_transaction_references(id)?;
            let mut ids: Vec<MessageId> = tagged.iter().map(|row| row.message_id).collect();
            ids.dedup();
            let handles: HashMap<MessageId, _> = load_handles(&self.ctx, tx, &ids)?
                .into_iter()
                .map(|handle| (handle.id(), handle))
                .collect();

            let mut work = PendingWork::default();
            for row in tagged {
                let handle = handles.get(&row.message_id).ok_or_else(|| {
                    StoreError::Consistency(format!(
                        "transaction {id} references missing message {}",
                        row.message_id
                    ))
                })?;
                let reference = MessageReference {
                    message: Arc::clone(handle),
                    delivery_count: row.delivery_count,
                    paging_order: row.page_ord,
                    reliable: row.reliable,
                };
                match row.state {
                    RefState::PendingAdd => work.adds.push((row.channel_id, reference)),
                    RefState::PendingRemove => work.removes.push((row.channel_id, reference)),
                    RefState::Committed => {
                        return Err(StoreError::Consistency(format!(
                            "committed reference to message {} still tagged with transaction {id}",
                            row.message_id
                        )));
                    }
                }
            }
            Ok(work)
        })?;

        info!(
            tx = id,
            adds = work.adds.len(),
            removes = work.removes.len(),
            "recovered prepared transaction"
        );
        let ctx = Arc::clone(&self.ctx);
        transaction
            .keyed_callback(STORE_CALLBACK_KEY, |tx| {
                StoreTxCallback::new(ctx, tx.id(), tx.xid().cloned())
            })?
            .replace_work(work);
        Ok(())
    }
}
