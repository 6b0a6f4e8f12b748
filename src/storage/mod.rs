//! Storage layer for msgstore
//!
//! The components here share one [`StoreContext`]: the backend, the message
//! lock table, and the registry of live message handles.

pub mod backend;
pub mod batch;
pub mod coordinator;
pub mod counts;
pub mod ids;
pub mod ledger;
pub mod locks;
pub mod migrations;
pub mod paging;
pub mod registry;
pub mod retry;
pub mod sqlite;
pub mod store;

use std::sync::Arc;

use tracing::debug;

use crate::core::MessageId;
use crate::error::Result;

pub use backend::{Backend, Isolation, ReferenceRow, Statement, StatementKind, StoreStats, StoreTx};
pub use batch::{StatementBatch, WriteMode};
pub use coordinator::{STORE_CALLBACK_KEY, StoreTxCallback, TransactionCoordinator};
pub use counts::CountChanges;
pub use ids::IdBlockAllocator;
pub use ledger::ReferenceLedger;
pub use locks::{LockManager, MessageLocks};
pub use paging::PagingController;
pub use registry::MessageRegistry;
pub use retry::RetryPolicy;
pub use sqlite::{SqliteBackend, SqliteOptions};
pub use store::{MessageStore, PurgeReport};

/// Behaviour switches shared by every store component.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreSettings {
    pub write_mode: WriteMode,
    pub retry: RetryPolicy,
}

/// State shared by the ledger, paging controller, coordinator, and
/// allocator of one store.
pub struct StoreContext {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) locks: LockManager,
    pub(crate) registry: MessageRegistry,
    pub(crate) settings: StoreSettings,
}

impl std::fmt::Debug for StoreContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreContext")
            .field("settings", &self.settings)
            .field("locks", &self.locks.len())
            .finish_non_exhaustive()
    }
}

impl StoreContext {
    pub fn new(backend: Arc<dyn Backend>, settings: StoreSettings) -> Self {
        Self {
            backend,
            locks: LockManager::new(),
            registry: MessageRegistry::new(),
            settings,
        }
    }

    pub fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub fn registry(&self) -> &MessageRegistry {
        &self.registry
    }

    pub const fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub(crate) fn batch<'a>(&self, tx: &'a dyn StoreTx) -> StatementBatch<'a> {
        StatementBatch::new(tx, self.settings.write_mode)
    }

    /// Run `work` in one backend transaction and commit it.
    pub(crate) fn read<T>(&self, work: impl FnOnce(&dyn StoreTx) -> Result<T>) -> Result<T> {
        let tx = self.backend.begin()?;
        let value = work(&*tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Run a count-changing write with every message in `ids` locked.
    ///
    /// On failure the backend transaction rolls back and every count change
    /// recorded in the journal is undone, before the locks are released.
    pub(crate) fn write_locked<T>(
        &self,
        operation: &str,
        ids: impl IntoIterator<Item = MessageId>,
        work: impl FnOnce(&dyn StoreTx, &mut CountChanges) -> Result<T>,
    ) -> Result<T> {
        let _locks = self.locks.lock_all(ids);
        let mut counts = CountChanges::new();

        let result = self
            .backend
            .begin()
            .and_then(|tx| {
                let value = work(&*tx, &mut counts)?;
                tx.commit()?;
                Ok(value)
            });

        match result {
            Ok(value) => Ok(value),
            Err(err) => {
                debug!(operation, changes = counts.len(), error = %err, "write failed, undoing count changes");
                counts.undo();
                Err(err)
            }
        }
    }
}
