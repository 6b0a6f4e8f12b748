use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};
use crate::storage::{RetryPolicy, SqliteOptions, StoreSettings, WriteMode};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub paging: PagingConfig,
}

impl Config {
    /// Load configuration: an explicit file (or `MSGSTORE_CONFIG`) replaces
    /// the global and project files; environment overrides apply last.
    pub fn load(explicit_path: Option<&Path>, root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("MSGSTORE_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            let patch = Self::load_patch(&path)?.ok_or_else(|| {
                StoreError::Config(format!("config file {} not found", path.display()))
            })?;
            config.merge_patch(patch);
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_project(root)? {
                config.merge_patch(project);
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;

        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        match dirs::config_dir() {
            Some(dir) => Self::load_patch(&dir.join("msgstore/config.toml")),
            None => Ok(None),
        }
    }

    fn load_project(root: &Path) -> Result<Option<ConfigPatch>> {
        let path = root.join("config.toml");
        Self::load_patch(&path)
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        if !path.exists() {
            return Ok(None);
        }

        let raw = std::fs::read_to_string(path)
            .map_err(|err| StoreError::Config(format!("read config {}: {err}", path.display())))?;
        let patch = toml::from_str(&raw)
            .map_err(|err| StoreError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.storage {
            self.storage.merge(patch);
        }
        if let Some(patch) = patch.paging {
            self.paging.merge(patch);
        }
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("MSGSTORE_STORE_PATH") {
            self.storage.path = PathBuf::from(value);
        }
        if let Some(value) = parse_bool(lookup("MSGSTORE_BATCH_UPDATES")) {
            self.storage.batch_updates = value;
        }
        if let Some(value) =
            parse_number("MSGSTORE_MAX_BATCH_PARAMS", lookup("MSGSTORE_MAX_BATCH_PARAMS"))?
        {
            self.storage.max_batch_params = value;
        }
        if let Some(value) = parse_bool(lookup("MSGSTORE_BINARY_STREAMS")) {
            self.storage.binary_streams = value;
        }
        if let Some(value) =
            parse_number("MSGSTORE_BUSY_TIMEOUT_MS", lookup("MSGSTORE_BUSY_TIMEOUT_MS"))?
        {
            self.storage.busy_timeout_ms = value;
        }
        if let Some(value) = parse_number(
            "MSGSTORE_PAGING_MAX_ATTEMPTS",
            lookup("MSGSTORE_PAGING_MAX_ATTEMPTS"),
        )? {
            self.paging.max_attempts = value;
        }
        if let Some(value) = parse_number(
            "MSGSTORE_PAGING_MAX_BACKOFF_MS",
            lookup("MSGSTORE_PAGING_MAX_BACKOFF_MS"),
        )? {
            self.paging.max_backoff_ms = value;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.max_batch_params == 0 {
            return Err(StoreError::Config(
                "storage.max_batch_params must be greater than 0".to_string(),
            ));
        }
        if self.paging.max_attempts == 0 {
            return Err(StoreError::Config(
                "paging.max_attempts must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn sqlite_options(&self) -> SqliteOptions {
        SqliteOptions {
            binary_streams: self.storage.binary_streams,
            busy_timeout: Duration::from_millis(self.storage.busy_timeout_ms),
            max_batch_params: self.storage.max_batch_params,
        }
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            write_mode: WriteMode::from_batch_updates(self.storage.batch_updates),
            retry: RetryPolicy::new(
                self.paging.max_attempts,
                Duration::from_millis(self.paging.max_backoff_ms),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub path: PathBuf,
    /// Group single-row writes per statement kind.
    pub batch_updates: bool,
    /// Largest `IN (...)` list in one bulk read.
    pub max_batch_params: usize,
    /// Stream header and payload bytes through incremental BLOB I/O.
    pub binary_streams: bool,
    pub busy_timeout_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            batch_updates: false,
            max_batch_params: 100,
            binary_streams: true,
            busy_timeout_ms: 5000,
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, patch: StoragePatch) {
        if let Some(value) = patch.path {
            self.path = value;
        }
        if let Some(value) = patch.batch_updates {
            self.batch_updates = value;
        }
        if let Some(value) = patch.max_batch_params {
            self.max_batch_params = value;
        }
        if let Some(value) = patch.binary_streams {
            self.binary_streams = value;
        }
        if let Some(value) = patch.busy_timeout_ms {
            self.busy_timeout_ms = value;
        }
    }
}

fn default_store_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("msgstore")
        .join("store.db")
}

/// Retry behaviour of paging range updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagingConfig {
    pub max_attempts: u32,
    pub max_backoff_ms: u64,
}

impl Default for PagingConfig {
    fn default() -> Self {
        Self {
            max_attempts: 25,
            max_backoff_ms: 500,
        }
    }
}

impl PagingConfig {
    fn merge(&mut self, patch: PagingPatch) {
        if let Some(value) = patch.max_attempts {
            self.max_attempts = value;
        }
        if let Some(value) = patch.max_backoff_ms {
            self.max_backoff_ms = value;
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ConfigPatch {
    pub storage: Option<StoragePatch>,
    pub paging: Option<PagingPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct StoragePatch {
    pub path: Option<PathBuf>,
    pub batch_updates: Option<bool>,
    pub max_batch_params: Option<usize>,
    pub binary_streams: Option<bool>,
    pub busy_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct PagingPatch {
    pub max_attempts: Option<u32>,
    pub max_backoff_ms: Option<u64>,
}

fn parse_bool(value: Option<String>) -> Option<bool> {
    value.map(|value| {
        matches!(
            value.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
}

fn parse_number<T>(key: &str, value: Option<String>) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match value {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| StoreError::Config(format!("invalid {key} value {value}: {err}"))),
        None => Ok(None),
    }
}
