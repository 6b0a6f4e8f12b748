//! msgstore prepared - list durably prepared transactions

use clap::Args;

use crate::app::AppContext;
use crate::cli::output::{HumanLayout, emit};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct PreparedArgs {}

pub fn run(ctx: &AppContext, _args: &PreparedArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let prepared = store.transactions().retrieve_prepared_transactions()?;
    if ctx.quiet && !ctx.machine_mode() {
        return Ok(());
    }

    emit(ctx.output_format, &prepared, |prepared| {
        let mut layout = HumanLayout::new();
        layout.title(&format!("Prepared transactions ({})", prepared.len()));
        for entry in prepared {
            layout.bullet(&format!("{}  xid {}", entry.transaction_id, entry.xid));
        }
        layout
    })
}
