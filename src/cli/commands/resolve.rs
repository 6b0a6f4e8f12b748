//! msgstore resolve - finish a prepared transaction left by a previous run

use clap::{ArgGroup, Args};
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::app::AppContext;
use crate::cli::output::{emit_json, machine_ok};
use crate::core::{Transaction, TransactionId};
use crate::error::{Result, StoreError};

#[derive(Args, Debug)]
#[command(group(ArgGroup::new("outcome").required(true).args(["commit", "rollback"])))]
pub struct ResolveArgs {
    /// Id of the prepared transaction
    pub transaction_id: TransactionId,

    /// Make the prepared work durable
    #[arg(long)]
    pub commit: bool,

    /// Discard the prepared work
    #[arg(long)]
    pub rollback: bool,
}

#[derive(Serialize)]
struct ResolveReport {
    transaction_id: TransactionId,
    outcome: &'static str,
}

pub fn run(ctx: &AppContext, args: &ResolveArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let coordinator = store.transactions();

    let prepared = coordinator
        .retrieve_prepared_transactions()?
        .into_iter()
        .find(|entry| entry.transaction_id == args.transaction_id)
        .ok_or_else(|| {
            StoreError::NotFound(format!("prepared transaction {}", args.transaction_id))
        })?;

    let mut transaction = Transaction::recovered(prepared.transaction_id, prepared.xid);
    coordinator.recover(&mut transaction)?;

    let outcome = if args.commit {
        transaction.commit()?;
        "committed"
    } else {
        transaction.rollback()?;
        "rolled_back"
    };
    info!(tx = args.transaction_id, outcome, "resolved prepared transaction");

    let report = ResolveReport {
        transaction_id: args.transaction_id,
        outcome,
    };
    if ctx.machine_mode() {
        return emit_json(&machine_ok(&report));
    }
    if !ctx.quiet {
        println!(
            "{} Transaction {} {}",
            "OK".green(),
            report.transaction_id,
            report.outcome.replace('_', " ")
        );
    }
    Ok(())
}
