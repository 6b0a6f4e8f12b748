//! Bulk write optimizer: row-at-a-time or grouped statement execution.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::trace;

use super::backend::{Statement, StatementKind, StoreTx};
use crate::error::{Result, StoreError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    #[default]
    RowAtATime,
    Batched,
}

impl WriteMode {
    pub const fn from_batch_updates(batch_updates: bool) -> Self {
        if batch_updates {
            Self::Batched
        } else {
            Self::RowAtATime
        }
    }
}

/// Stages single-row statements against a backend transaction.
///
/// In row mode each statement runs as soon as it is added. In batched mode
/// statements are grouped by kind and executed on [`flush`](Self::flush),
/// groups in [`StatementKind`] order. Callers flush once per phase in which
/// every message's count only moves one way, so that order is always valid.
pub struct StatementBatch<'a> {
    tx: &'a dyn StoreTx,
    mode: WriteMode,
    pending: BTreeMap<StatementKind, Vec<Statement>>,
}

impl<'a> StatementBatch<'a> {
    pub fn new(tx: &'a dyn StoreTx, mode: WriteMode) -> Self {
        Self {
            tx,
            mode,
            pending: BTreeMap::new(),
        }
    }

    pub fn add(&mut self, statement: Statement) -> Result<()> {
        match self.mode {
            WriteMode::RowAtATime => {
                let rows = self.tx.execute(&statement)?;
                expect_rows(statement.kind(), 1, rows)
            }
            WriteMode::Batched => {
                self.pending
                    .entry(statement.kind())
                    .or_default()
                    .push(statement);
                Ok(())
            }
        }
    }

    pub fn pending_len(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    /// Execute every staged group. A no-op in row mode.
    pub fn flush(&mut self) -> Result<()> {
        for (kind, statements) in std::mem::take(&mut self.pending) {
            trace!(kind = kind.name(), count = statements.len(), "flushing statement batch");
            let rows = self.tx.execute_batch(kind, &statements)?;
            expect_rows(kind, statements.len(), rows)?;
        }
        Ok(())
    }
}

fn expect_rows(kind: StatementKind, expected: usize, actual: usize) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(StoreError::Consistency(format!(
            "{} affected {actual} rows, expected {expected}",
            kind.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        ChannelId, Message, MessageId, PagingWindow, PreparedTransaction, ReferenceInfo,
        TransactionId, Xid,
    };
    use crate::storage::backend::{StoreStats, TaggedReference};
    use parking_lot::Mutex;

    /// Records executions; `DeleteMessage` statements affect no rows.
    #[derive(Default)]
    struct Recording {
        log: Mutex<Vec<(StatementKind, usize)>>,
    }

    impl Recording {
        fn rows_for(statement: &Statement) -> usize {
            usize::from(!matches!(statement, Statement::DeleteMessage { .. }))
        }
    }

    impl StoreTx for Recording {
        fn execute(&self, statement: &Statement) -> Result<usize> {
            self.log.lock().push((statement.kind(), 1));
            Ok(Self::rows_for(statement))
        }

        fn execute_batch(&self, kind: StatementKind, statements: &[Statement]) -> Result<usize> {
            self.log.lock().push((kind, statements.len()));
            Ok(statements.iter().map(Self::rows_for).sum())
        }

        fn commit_pending_adds(&self, _: TransactionId) -> Result<usize> {
            unimplemented!()
        }
        fn delete_pending_removes(&self, _: TransactionId) -> Result<usize> {
            unimplemented!()
        }
        fn delete_pending_adds(&self, _: TransactionId) -> Result<usize> {
            unimplemented!()
        }
        fn restore_pending_removes(&self, _: TransactionId) -> Result<usize> {
            unimplemented!()
        }
        fn load_transaction_references(&self, _: TransactionId) -> Result<Vec<TaggedReference>> {
            unimplemented!()
        }
        fn insert_transaction(&self, _: TransactionId, _: &Xid) -> Result<usize> {
            unimplemented!()
        }
        fn delete_transaction(&self, _: TransactionId) -> Result<usize> {
            unimplemented!()
        }
        fn select_prepared_transactions(&self) -> Result<Vec<PreparedTransaction>> {
            unimplemented!()
        }
        fn page_order_bounds(&self, _: ChannelId) -> Result<Option<PagingWindow>> {
            unimplemented!()
        }
        fn load_unpaged_references(&self, _: ChannelId) -> Result<Vec<ReferenceInfo>> {
            unimplemented!()
        }
        fn load_paged_references(
            &self,
            _: ChannelId,
            _: i64,
            _: i64,
        ) -> Result<Vec<(i64, ReferenceInfo)>> {
            unimplemented!()
        }
        fn clear_page_order_range(&self, _: ChannelId, _: i64, _: i64) -> Result<usize> {
            unimplemented!()
        }
        fn shift_page_order(&self, _: ChannelId, _: i64) -> Result<usize> {
            unimplemented!()
        }
        fn load_messages(&self, _: &[MessageId]) -> Result<Vec<(Message, u32)>> {
            unimplemented!()
        }
        fn select_counter(&self, _: &str) -> Result<Option<i64>> {
            unimplemented!()
        }
        fn insert_counter(&self, _: &str, _: i64) -> Result<usize> {
            unimplemented!()
        }
        fn update_counter(&self, _: &str, _: i64) -> Result<usize> {
            unimplemented!()
        }
        fn select_unreliable_channels(&self) -> Result<Vec<ChannelId>> {
            unimplemented!()
        }
        fn decrement_unreliable_channel_counts(&self, _: ChannelId) -> Result<usize> {
            unimplemented!()
        }
        fn delete_unreliable_references(&self) -> Result<usize> {
            unimplemented!()
        }
        fn delete_unreferenced_messages(&self) -> Result<usize> {
            unimplemented!()
        }
        fn stats(&self) -> Result<StoreStats> {
            unimplemented!()
        }
        fn commit(self: Box<Self>) -> Result<()> {
            Ok(())
        }
    }

    fn update(message_id: MessageId) -> Statement {
        Statement::UpdateMessageChannelCount {
            message_id,
            channel_count: 2,
        }
    }

    fn delete_ref(message_id: MessageId) -> Statement {
        Statement::DeleteReference {
            channel_id: 1,
            message_id,
        }
    }

    #[test]
    fn row_mode_executes_immediately() {
        let tx = Recording::default();
        let mut batch = StatementBatch::new(&tx, WriteMode::RowAtATime);
        batch.add(update(1)).unwrap();
        batch.add(delete_ref(1)).unwrap();
        assert_eq!(batch.pending_len(), 0);
        assert_eq!(tx.log.lock().len(), 2);
    }

    #[test]
    fn row_mode_rejects_unexpected_row_count() {
        let tx = Recording::default();
        let mut batch = StatementBatch::new(&tx, WriteMode::RowAtATime);
        let err = batch
            .add(Statement::DeleteMessage { message_id: 4 })
            .unwrap_err();
        assert!(err.to_string().contains("delete_message"));
    }

    #[test]
    fn batched_mode_groups_by_kind_in_fixed_order() {
        let tx = Recording::default();
        let mut batch = StatementBatch::new(&tx, WriteMode::Batched);
        batch.add(update(1)).unwrap();
        batch.add(delete_ref(1)).unwrap();
        batch.add(update(2)).unwrap();
        assert!(tx.log.lock().is_empty());
        assert_eq!(batch.pending_len(), 3);

        batch.flush().unwrap();
        assert_eq!(
            *tx.log.lock(),
            vec![
                (StatementKind::DeleteReference, 1),
                (StatementKind::UpdateMessageChannelCount, 2),
            ]
        );
        assert_eq!(batch.pending_len(), 0);
    }

    #[test]
    fn batched_mode_checks_group_totals() {
        let tx = Recording::default();
        let mut batch = StatementBatch::new(&tx, WriteMode::Batched);
        batch.add(Statement::DeleteMessage { message_id: 1 }).unwrap();
        assert!(matches!(batch.flush(), Err(StoreError::Consistency(_))));
    }
}
