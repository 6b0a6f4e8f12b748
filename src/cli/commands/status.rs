//! msgstore status - row counts and startup housekeeping results

use std::path::PathBuf;

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit};
use crate::error::Result;
use crate::storage::{Isolation, PurgeReport, StoreStats};

#[derive(Args, Debug)]
pub struct StatusArgs {}

#[derive(Serialize)]
struct StatusReport {
    store: PathBuf,
    isolation: Isolation,
    batch_updates: bool,
    binary_streams: bool,
    purge: PurgeReport,
    stats: StoreStats,
}

pub fn run(ctx: &AppContext, _args: &StatusArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let report = StatusReport {
        store: ctx.config.storage.path.clone(),
        isolation: store.isolation(),
        batch_updates: ctx.config.storage.batch_updates,
        binary_streams: ctx.config.storage.binary_streams,
        purge: store.purge_report(),
        stats: store.stats()?,
    };
    if ctx.quiet && !ctx.machine_mode() {
        return Ok(());
    }

    emit(ctx.output_format, &report, |report| {
        let mut layout = HumanLayout::new();
        layout
            .title("Message store")
            .kv("path", report.store.display())
            .kv("isolation", format!("{:?}", report.isolation))
            .kv("batch updates", report.batch_updates)
            .kv("binary streams", report.binary_streams)
            .blank()
            .section("Rows")
            .kv("messages", report.stats.messages)
            .kv("references", report.stats.references)
            .kv("pending adds", report.stats.pending_adds)
            .kv("pending removes", report.stats.pending_removes)
            .kv("paged references", report.stats.paged_references)
            .kv("prepared transactions", report.stats.prepared_transactions)
            .kv("counters", report.stats.counters)
            .blank()
            .section("Startup purge")
            .kv("channels", report.purge.channels)
            .kv("references removed", report.purge.references_removed)
            .kv("messages removed", report.purge.messages_removed);
        layout
    })
}
