//! msgstore init - create the store database and optionally a config file

use std::fs;
use std::path::PathBuf;

use clap::Args;
use colored::Colorize;
use serde::Serialize;

use crate::app::AppContext;
use crate::cli::output::{emit_json, machine_ok};
use crate::error::{Result, StoreError};
use crate::storage::PurgeReport;
use crate::storage::migrations::SCHEMA_VERSION;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Also write the effective configuration to ./config.toml
    #[arg(long)]
    pub write_config: bool,

    /// Overwrite an existing config.toml
    #[arg(long, short)]
    pub force: bool,
}

#[derive(Serialize)]
struct InitReport {
    store: PathBuf,
    schema_version: u32,
    config_written: Option<PathBuf>,
    purge: PurgeReport,
}

pub fn run(ctx: &AppContext, args: &InitArgs) -> Result<()> {
    let store = ctx.open_store()?;

    let config_written = if args.write_config {
        let path = ctx.root.join("config.toml");
        if path.exists() && !args.force {
            return Err(StoreError::Config(format!(
                "{} already exists (use --force to overwrite)",
                path.display()
            )));
        }
        let rendered = toml::to_string_pretty(&ctx.config)
            .map_err(|err| StoreError::Config(format!("render config: {err}")))?;
        fs::write(&path, rendered)?;
        Some(path)
    } else {
        None
    };

    let report = InitReport {
        store: ctx.config.storage.path.clone(),
        schema_version: SCHEMA_VERSION,
        config_written,
        purge: store.purge_report(),
    };

    if ctx.machine_mode() {
        return emit_json(&machine_ok(&report));
    }
    if ctx.quiet {
        return Ok(());
    }

    println!(
        "{} Store ready at {} (schema v{})",
        "OK".green(),
        report.store.display(),
        report.schema_version
    );
    if let Some(path) = &report.config_written {
        println!("{} Wrote {}", "OK".green(), path.display());
    }
    if report.purge.references_removed > 0 {
        println!(
            "{} Removed {} non-durable references from {} channels",
            "!".yellow(),
            report.purge.references_removed,
            report.purge.channels
        );
    }
    Ok(())
}
