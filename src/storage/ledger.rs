//! Reference ledger: message rows, channel reference rows, and the
//! persistent channel count that ties them together.
//!
//! A message row exists exactly while its channel count is above zero. The
//! count lives on the shared [`MessageHandle`] and is only changed here and
//! in the transaction coordinator, with the message locked.

use std::sync::Arc;

use tracing::{debug, trace};

use super::backend::{ReferenceRow, Statement};
use super::batch::StatementBatch;
use super::coordinator::{STORE_CALLBACK_KEY, StoreTxCallback};
use super::counts::CountChanges;
use super::StoreContext;
use crate::core::{
    ChannelId, Message, MessageHandle, MessageId, MessageReference, RefState, Transaction,
    TransactionId, TxState,
};
use crate::error::{Result, StoreError};

/// Stage a reference row insert plus the matching count increment.
pub(crate) fn stage_reference_add(
    batch: &mut StatementBatch<'_>,
    counts: &mut CountChanges,
    channel_id: ChannelId,
    reference: &MessageReference,
    state: RefState,
    transaction_id: Option<TransactionId>,
) -> Result<()> {
    batch.add(Statement::InsertReference(ReferenceRow {
        channel_id,
        message_id: reference.message_id(),
        transaction_id,
        state,
        page_ord: reference.paging_order,
        delivery_count: reference.delivery_count,
        reliable: reference.reliable,
    }))?;
    stage_increment(batch, counts, &reference.message)
}

/// Stage deletion of a committed reference row plus the count decrement.
pub(crate) fn stage_reference_remove(
    batch: &mut StatementBatch<'_>,
    counts: &mut CountChanges,
    channel_id: ChannelId,
    reference: &MessageReference,
) -> Result<()> {
    batch.add(Statement::DeleteReference {
        channel_id,
        message_id: reference.message_id(),
    })?;
    stage_decrement(batch, counts, &reference.message)
}

/// Increment the count; the first channel inserts the message row.
pub(crate) fn stage_increment(
    batch: &mut StatementBatch<'_>,
    counts: &mut CountChanges,
    handle: &MessageHandle,
) -> Result<()> {
    let channel_count = counts.increment(handle);
    if channel_count == 1 {
        batch.add(Statement::InsertMessage {
            message: Arc::clone(handle),
            channel_count,
        })
    } else {
        batch.add(Statement::UpdateMessageChannelCount {
            message_id: handle.id(),
            channel_count,
        })
    }
}

/// Decrement the count; the last channel deletes the message row.
pub(crate) fn stage_decrement(
    batch: &mut StatementBatch<'_>,
    counts: &mut CountChanges,
    handle: &MessageHandle,
) -> Result<()> {
    let channel_count = counts.decrement(handle)?;
    if channel_count == 0 {
        batch.add(Statement::DeleteMessage {
            message_id: handle.id(),
        })
    } else {
        batch.add(Statement::UpdateMessageChannelCount {
            message_id: handle.id(),
            channel_count,
        })
    }
}

/// Load messages by id through the registry, so callers get canonical handles.
pub(crate) fn load_handles(
    ctx: &StoreContext,
    tx: &dyn super::StoreTx,
    ids: &[MessageId],
) -> Result<Vec<MessageHandle>> {
    Ok(tx
        .load_messages(ids)?
        .into_iter()
        .map(|(message, channel_count)| ctx.registry.intern(message, channel_count))
        .collect())
}

fn sorted_by_message(refs: &[MessageReference]) -> Vec<&MessageReference> {
    let mut sorted: Vec<&MessageReference> = refs.iter().collect();
    sorted.sort_by_key(|reference| reference.message_id());
    sorted
}

fn require_active(tx: &Transaction, action: &str) -> Result<()> {
    if tx.state() == TxState::Active {
        Ok(())
    } else {
        Err(StoreError::InvalidTransactionState {
            id: tx.id(),
            state: tx.state().to_string(),
            action: action.to_string(),
        })
    }
}

/// Adds and removes channel references, keeping message rows in step.
#[derive(Debug, Clone)]
pub struct ReferenceLedger {
    ctx: Arc<StoreContext>,
}

impl ReferenceLedger {
    pub(crate) const fn new(ctx: Arc<StoreContext>) -> Self {
        Self { ctx }
    }

    fn store_callback(&self, tx: &mut Transaction) -> Result<Arc<StoreTxCallback>> {
        let ctx = Arc::clone(&self.ctx);
        tx.keyed_callback(STORE_CALLBACK_KEY, |tx| {
            StoreTxCallback::new(ctx, tx.id(), tx.xid().cloned())
        })
    }

    /// Add a reference. With a transaction the add is only recorded and
    /// reaches storage when the transaction prepares or commits.
    pub fn add_reference(
        &self,
        channel_id: ChannelId,
        reference: &MessageReference,
        tx: Option<&mut Transaction>,
    ) -> Result<()> {
        if let Some(tx) = tx {
            require_active(tx, "add reference")?;
            self.store_callback(tx)?
                .record_add(channel_id, reference.clone());
            return Ok(());
        }

        trace!(channel = channel_id, message = reference.message_id(), "adding reference");
        self.ctx
            .write_locked("add_reference", [reference.message_id()], |tx, counts| {
                let mut batch = self.ctx.batch(tx);
                stage_reference_add(
                    &mut batch,
                    counts,
                    channel_id,
                    reference,
                    RefState::Committed,
                    None,
                )?;
                batch.flush()
            })
    }

    /// Remove a committed reference, deleting the message with its last one.
    pub fn remove_reference(
        &self,
        channel_id: ChannelId,
        reference: &MessageReference,
        tx: Option<&mut Transaction>,
    ) -> Result<()> {
        if let Some(tx) = tx {
            require_active(tx, "remove reference")?;
            self.store_callback(tx)?
                .record_remove(channel_id, reference.clone());
            return Ok(());
        }

        trace!(channel = channel_id, message = reference.message_id(), "removing reference");
        self.ctx
            .write_locked("remove_reference", [reference.message_id()], |tx, counts| {
                let mut batch = self.ctx.batch(tx);
                stage_reference_remove(&mut batch, counts, channel_id, reference)?;
                batch.flush()
            })
    }

    /// Add many references to one channel in a single backend transaction.
    pub fn add_references(&self, channel_id: ChannelId, refs: &[MessageReference]) -> Result<()> {
        if refs.is_empty() {
            return Ok(());
        }
        let sorted = sorted_by_message(refs);
        debug!(channel = channel_id, count = sorted.len(), "adding references");
        self.ctx.write_locked(
            "add_references",
            sorted.iter().map(|reference| reference.message_id()),
            |tx, counts| {
                let mut batch = self.ctx.batch(tx);
                for reference in &sorted {
                    stage_reference_add(
                        &mut batch,
                        counts,
                        channel_id,
                        reference,
                        RefState::Committed,
                        None,
                    )?;
                }
                batch.flush()
            },
        )
    }

    /// Remove many committed references from one channel.
    pub fn remove_references(
        &self,
        channel_id: ChannelId,
        refs: &[MessageReference],
    ) -> Result<()> {
        if refs.is_empty() {
            return Ok(());
        }
        let sorted = sorted_by_message(refs);
        debug!(channel = channel_id, count = sorted.len(), "removing references");
        self.ctx.write_locked(
            "remove_references",
            sorted.iter().map(|reference| reference.message_id()),
            |tx, counts| {
                let mut batch = self.ctx.batch(tx);
                for reference in &sorted {
                    stage_reference_remove(&mut batch, counts, channel_id, reference)?;
                }
                batch.flush()
            },
        )
    }

    /// Load messages by id. Unknown ids are skipped; order is unspecified.
    pub fn get_messages(&self, ids: &[MessageId]) -> Result<Vec<MessageHandle>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        self.ctx.read(|tx| load_handles(&self.ctx, tx, ids))
    }

    /// Canonical handle for `message`, shared with every other live holder.
    ///
    /// With no live holder, the channel count is seeded from the stored row,
    /// or 0 if the message has never been stored.
    pub fn message_handle(&self, message: Message) -> Result<MessageHandle> {
        if let Some(live) = self.ctx.registry.get(message.id) {
            return Ok(live);
        }
        let id = message.id;
        let stored = self.ctx.read(|tx| tx.load_messages(&[id]))?;
        let channel_count = stored.first().map_or(0, |(_, count)| *count);
        Ok(self.ctx.registry.intern(message, channel_count))
    }
}
