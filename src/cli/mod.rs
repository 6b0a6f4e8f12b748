//! CLI module - Command-line interface definitions and handlers
//!
//! Uses clap v4 with derive macros for argument parsing.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use output::OutputFormat;

pub mod commands;
pub mod output;

/// msgstore - inspect and administer a durable message store
#[derive(Parser, Debug)]
#[command(name = "msgstore")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable machine-readable JSON output
    #[arg(long, short = 'm', global = true)]
    pub machine: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Config file path (default: ~/.config/msgstore/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Store database path, overriding the configured one
    #[arg(long, global = true, value_name = "PATH")]
    pub store: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    #[must_use]
    pub const fn output_format(&self) -> OutputFormat {
        OutputFormat::from_machine_flag(self.machine)
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the store database and apply schema migrations
    Init(commands::init::InitArgs),

    /// Show row counts and housekeeping results for the store
    Status(commands::status::StatusArgs),

    /// List durably prepared transactions
    Prepared(commands::prepared::PreparedArgs),

    /// Commit or roll back a prepared transaction
    Resolve(commands::resolve::ResolveArgs),

    /// Reserve a block of ids from a named counter
    Reserve(commands::reserve::ReserveArgs),

    /// Reconcile a channel's paging window and show its in-memory references
    Channel(commands::channel::ChannelArgs),
}
