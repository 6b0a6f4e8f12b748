//! Per-invocation state shared by CLI commands.

use std::path::PathBuf;

use tracing::debug;

use crate::cli::{Cli, OutputFormat};
use crate::config::Config;
use crate::error::Result;
use crate::storage::MessageStore;

#[derive(Debug)]
pub struct AppContext {
    pub config: Config,
    pub root: PathBuf,
    pub output_format: OutputFormat,
    pub verbosity: u8,
    pub quiet: bool,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let root = std::env::current_dir()?;
        let mut config = Config::load(cli.config.as_deref(), &root)?;
        if let Some(store) = &cli.store {
            config.storage.path.clone_from(store);
        }
        debug!(store = %config.storage.path.display(), "resolved configuration");

        Ok(Self {
            config,
            root,
            output_format: cli.output_format(),
            verbosity: cli.verbose,
            quiet: cli.quiet,
        })
    }

    #[must_use]
    pub const fn machine_mode(&self) -> bool {
        self.output_format.is_machine_readable()
    }

    /// Open the configured store, running migrations and startup housekeeping.
    pub fn open_store(&self) -> Result<MessageStore> {
        MessageStore::open(&self.config)
    }
}
