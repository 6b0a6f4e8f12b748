pub mod app;
pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod storage;

pub use error::{Result, StoreError};

/// Package version from Cargo.toml.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
