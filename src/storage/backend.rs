//! Typed interface to the transactional store.
//!
//! Every logical statement the store issues is a named operation here, so a
//! backend never sees raw SQL from the components above it.

use serde::Serialize;

use crate::core::{
    ChannelId, Message, MessageHandle, MessageId, PagingWindow, PreparedTransaction, RefState,
    ReferenceInfo, TransactionId, Xid,
};
use crate::error::Result;

/// Isolation level reported by a backend, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Isolation {
    ReadUncommitted,
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

/// A reference row to insert. The backend assigns the insertion ordinal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceRow {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub transaction_id: Option<TransactionId>,
    pub state: RefState,
    pub page_ord: Option<i64>,
    pub delivery_count: i32,
    pub reliable: bool,
}

/// A reference row tagged with a transaction id, as found after a restart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedReference {
    pub channel_id: ChannelId,
    pub message_id: MessageId,
    pub state: RefState,
    pub page_ord: Option<i64>,
    pub delivery_count: i32,
    pub reliable: bool,
}

/// Single-row write statements. Each must affect exactly one row.
#[derive(Debug, Clone)]
pub enum Statement {
    InsertReference(ReferenceRow),
    /// `Committed -> PendingRemove`, tagging the row with the transaction.
    MarkReferenceRemoving {
        channel_id: ChannelId,
        message_id: MessageId,
        transaction_id: TransactionId,
    },
    /// Delete a `Committed` reference row.
    DeleteReference {
        channel_id: ChannelId,
        message_id: MessageId,
    },
    UpdatePageOrder {
        channel_id: ChannelId,
        message_id: MessageId,
        page_ord: i64,
    },
    InsertMessage {
        message: MessageHandle,
        channel_count: u32,
    },
    UpdateMessageChannelCount {
        message_id: MessageId,
        channel_count: u32,
    },
    DeleteMessage {
        message_id: MessageId,
    },
}

/// Statement kinds in the order batched groups are flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum StatementKind {
    InsertReference,
    MarkReferenceRemoving,
    DeleteReference,
    UpdatePageOrder,
    InsertMessage,
    UpdateMessageChannelCount,
    DeleteMessage,
}

impl StatementKind {
    pub const fn name(self) -> &'static str {
        match self {
            Self::InsertReference => "insert_reference",
            Self::MarkReferenceRemoving => "mark_reference_removing",
            Self::DeleteReference => "delete_reference",
            Self::UpdatePageOrder => "update_page_order",
            Self::InsertMessage => "insert_message",
            Self::UpdateMessageChannelCount => "update_message_channel_count",
            Self::DeleteMessage => "delete_message",
        }
    }
}

impl Statement {
    pub const fn kind(&self) -> StatementKind {
        match self {
            Self::InsertReference(_) => StatementKind::InsertReference,
            Self::MarkReferenceRemoving { .. } => StatementKind::MarkReferenceRemoving,
            Self::DeleteReference { .. } => StatementKind::DeleteReference,
            Self::UpdatePageOrder { .. } => StatementKind::UpdatePageOrder,
            Self::InsertMessage { .. } => StatementKind::InsertMessage,
            Self::UpdateMessageChannelCount { .. } => StatementKind::UpdateMessageChannelCount,
            Self::DeleteMessage { .. } => StatementKind::DeleteMessage,
        }
    }
}

/// Row counts per table, for status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub messages: u64,
    pub references: u64,
    pub pending_adds: u64,
    pub pending_removes: u64,
    pub paged_references: u64,
    pub prepared_transactions: u64,
    pub counters: u64,
}

/// A transactional store. All work happens inside a [`StoreTx`].
pub trait Backend: Send + Sync {
    /// Begin a backend transaction. Dropping it without commit rolls back.
    fn begin(&self) -> Result<Box<dyn StoreTx + '_>>;

    fn isolation(&self) -> Isolation;
}

/// One backend transaction.
pub trait StoreTx {
    /// Execute one statement immediately, returning rows affected.
    fn execute(&self, statement: &Statement) -> Result<usize>;

    /// Execute statements of a single kind through one cached prepared
    /// statement, returning total rows affected.
    fn execute_batch(&self, kind: StatementKind, statements: &[Statement]) -> Result<usize>;

    // Two-phase state transitions, bulk by transaction id.
    fn commit_pending_adds(&self, transaction_id: TransactionId) -> Result<usize>;
    fn delete_pending_removes(&self, transaction_id: TransactionId) -> Result<usize>;
    fn delete_pending_adds(&self, transaction_id: TransactionId) -> Result<usize>;
    fn restore_pending_removes(&self, transaction_id: TransactionId) -> Result<usize>;
    fn load_transaction_references(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Vec<TaggedReference>>;

    fn insert_transaction(&self, transaction_id: TransactionId, xid: &Xid) -> Result<usize>;
    fn delete_transaction(&self, transaction_id: TransactionId) -> Result<usize>;
    fn select_prepared_transactions(&self) -> Result<Vec<PreparedTransaction>>;

    // Paging.
    fn page_order_bounds(&self, channel_id: ChannelId) -> Result<Option<PagingWindow>>;
    /// Unpaged, non-pending-add references in insertion order.
    fn load_unpaged_references(&self, channel_id: ChannelId) -> Result<Vec<ReferenceInfo>>;
    /// References with page order in `[first, last]`, ordered by page order.
    fn load_paged_references(
        &self,
        channel_id: ChannelId,
        first: i64,
        last: i64,
    ) -> Result<Vec<(i64, ReferenceInfo)>>;
    fn clear_page_order_range(&self, channel_id: ChannelId, first: i64, last: i64)
    -> Result<usize>;
    fn shift_page_order(&self, channel_id: ChannelId, by: i64) -> Result<usize>;

    /// Messages with their stored channel counts. Unknown ids are skipped.
    fn load_messages(&self, ids: &[MessageId]) -> Result<Vec<(Message, u32)>>;

    // Named counters.
    fn select_counter(&self, name: &str) -> Result<Option<i64>>;
    fn insert_counter(&self, name: &str, next_id: i64) -> Result<usize>;
    fn update_counter(&self, name: &str, next_id: i64) -> Result<usize>;

    // Startup housekeeping.
    fn select_unreliable_channels(&self) -> Result<Vec<ChannelId>>;
    fn decrement_unreliable_channel_counts(&self, channel_id: ChannelId) -> Result<usize>;
    fn delete_unreliable_references(&self) -> Result<usize>;
    fn delete_unreferenced_messages(&self) -> Result<usize>;

    fn stats(&self) -> Result<StoreStats>;

    fn commit(self: Box<Self>) -> Result<()>;
}
