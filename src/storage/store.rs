//! The message store facade and its startup housekeeping.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use super::backend::{Backend, Isolation, StoreStats};
use super::sqlite::{SqliteBackend, SqliteOptions};
use super::{
    IdBlockAllocator, LockManager, PagingController, ReferenceLedger, StoreContext,
    StoreSettings, TransactionCoordinator,
};
use crate::config::Config;
use crate::error::Result;

/// What the startup purge of non-durable data removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub channels: usize,
    pub references_removed: usize,
    pub messages_removed: usize,
}

/// A store with its components wired to one shared context.
#[derive(Debug)]
pub struct MessageStore {
    ctx: Arc<StoreContext>,
    ledger: ReferenceLedger,
    paging: PagingController,
    transactions: TransactionCoordinator,
    ids: IdBlockAllocator,
    purge: PurgeReport,
}

impl MessageStore {
    /// Open the SQLite store described by `config`.
    pub fn open(config: &Config) -> Result<Self> {
        let backend = SqliteBackend::open(&config.storage.path, config.sqlite_options())?;
        Self::with_backend(Arc::new(backend), config.store_settings())
    }

    /// Open a SQLite store at `path` with default connection options.
    pub fn open_path(path: impl AsRef<Path>, settings: StoreSettings) -> Result<Self> {
        let backend = SqliteBackend::open(path, SqliteOptions::default())?;
        Self::with_backend(Arc::new(backend), settings)
    }

    pub fn in_memory(settings: StoreSettings) -> Result<Self> {
        let backend = SqliteBackend::open_in_memory(SqliteOptions::default())?;
        Self::with_backend(Arc::new(backend), settings)
    }

    /// Wire the components to `backend` and run startup housekeeping.
    pub fn with_backend(backend: Arc<dyn Backend>, settings: StoreSettings) -> Result<Self> {
        let ctx = Arc::new(StoreContext::new(backend, settings));
        check_isolation(ctx.backend.isolation());
        let purge = purge_unreliable_data(&ctx)?;

        Ok(Self {
            ledger: ReferenceLedger::new(Arc::clone(&ctx)),
            paging: PagingController::new(Arc::clone(&ctx)),
            transactions: TransactionCoordinator::new(Arc::clone(&ctx)),
            ids: IdBlockAllocator::new(Arc::clone(&ctx)),
            ctx,
            purge,
        })
    }

    pub const fn ledger(&self) -> &ReferenceLedger {
        &self.ledger
    }

    pub const fn paging(&self) -> &PagingController {
        &self.paging
    }

    pub const fn transactions(&self) -> &TransactionCoordinator {
        &self.transactions
    }

    pub const fn ids(&self) -> &IdBlockAllocator {
        &self.ids
    }

    pub fn locks(&self) -> &LockManager {
        &self.ctx.locks
    }

    pub fn context(&self) -> Arc<StoreContext> {
        Arc::clone(&self.ctx)
    }

    pub fn isolation(&self) -> Isolation {
        self.ctx.backend.isolation()
    }

    /// What the purge at open time removed.
    pub const fn purge_report(&self) -> PurgeReport {
        self.purge
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.ctx.read(|tx| tx.stats())
    }
}

fn check_isolation(isolation: Isolation) {
    if isolation < Isolation::ReadCommitted {
        warn!(
            ?isolation,
            "backend isolation is weaker than read committed; concurrent paging may misbehave"
        );
    } else if isolation > Isolation::ReadCommitted {
        debug!(?isolation, "backend isolation is stricter than read committed");
    }
}

/// Remove references that were never meant to survive a restart, and any
/// message left without a channel.
fn purge_unreliable_data(ctx: &StoreContext) -> Result<PurgeReport> {
    let report = ctx.read(|tx| {
        let channels = tx.select_unreliable_channels()?;
        for channel_id in &channels {
            tx.decrement_unreliable_channel_counts(*channel_id)?;
        }
        Ok(PurgeReport {
            channels: channels.len(),
            references_removed: tx.delete_unreliable_references()?,
            messages_removed: tx.delete_unreferenced_messages()?,
        })
    })?;

    if report.references_removed > 0 || report.messages_removed > 0 {
        info!(
            channels = report.channels,
            references = report.references_removed,
            messages = report.messages_removed,
            "removed unreliable data left by previous run"
        );
    }
    Ok(report)
}
