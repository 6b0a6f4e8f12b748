//! CLI command implementations
//!
//! Each subcommand has its own module with:
//! - Args struct for command-line arguments
//! - `run()` function to execute the command

use crate::app::AppContext;
use crate::cli::Commands;
use crate::error::Result;

pub mod channel;
pub mod init;
pub mod prepared;
pub mod reserve;
pub mod resolve;
pub mod status;

/// Dispatch a command to its handler
pub fn run(ctx: &AppContext, command: &Commands) -> Result<()> {
    match command {
        Commands::Init(args) => init::run(ctx, args),
        Commands::Status(args) => status::run(ctx, args),
        Commands::Prepared(args) => prepared::run(ctx, args),
        Commands::Resolve(args) => resolve::run(ctx, args),
        Commands::Reserve(args) => reserve::run(ctx, args),
        Commands::Channel(args) => channel::run(ctx, args),
    }
}
