//! msgstore reserve - reserve a block of ids from a named counter

use clap::Args;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, machine_ok};
use crate::error::Result;

#[derive(Args, Debug)]
pub struct ReserveArgs {
    /// Counter name
    pub name: String,

    /// Number of ids to reserve
    #[arg(allow_negative_numbers = true)]
    pub size: i64,
}

#[derive(Serialize)]
struct Reservation<'a> {
    counter: &'a str,
    first: i64,
    size: i64,
}

pub fn run(ctx: &AppContext, args: &ReserveArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let first = store.ids().reserve_id_block(&args.name, args.size)?;
    let reservation = Reservation {
        counter: &args.name,
        first,
        size: args.size,
    };

    if ctx.machine_mode() {
        return emit_json(&machine_ok(&reservation));
    }
    if !ctx.quiet {
        println!(
            "{}: reserved [{}, {})",
            reservation.counter,
            reservation.first,
            reservation.first + reservation.size
        );
    }
    Ok(())
}
