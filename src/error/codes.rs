//! Standardized error codes for machine-parseable output.
//!
//! Error codes follow a numeric taxonomy:
//! - 3xx: Config errors
//! - 6xx: Storage errors
//! - 7xx: Paging errors
//! - 8xx: Lock/Transaction errors
//! - 9xx: Internal errors

use serde::{Deserialize, Serialize};

/// Standardized error codes for JSON output.
///
/// Each variant maps to a numeric code (e.g., `DatabaseError` -> E604).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================
    // Config errors (3xx)
    // ========================================
    /// E301: Config file not found
    ConfigNotFound,
    /// E302: Config file has invalid syntax or values
    ConfigInvalid,

    // ========================================
    // Storage errors (6xx)
    // ========================================
    /// E601: Failed to read from storage
    StorageReadError,
    /// E602: Backend reported lock contention or a detected deadlock
    StorageContention,
    /// E603: Stored rows disagree with what the operation expected
    ConsistencyViolation,
    /// E604: Database operation failed
    DatabaseError,
    /// E605: Serialization/deserialization failed
    SerializationError,

    // ========================================
    // Paging errors (7xx)
    // ========================================
    /// E701: A retried paging update never succeeded
    RetriesExhausted,

    // ========================================
    // Lock/Transaction errors (8xx)
    // ========================================
    /// E801: Transaction is not in a state that allows the operation
    InvalidTransactionState,
    /// E802: Caller supplied an argument outside the accepted range
    InvalidArgument,

    // ========================================
    // Internal errors (9xx)
    // ========================================
    /// E905: Requested record does not exist
    NotFound,
    /// E906: IO operation failed
    IoError,
}

impl ErrorCode {
    /// Get the numeric error code (e.g., `DatabaseError` -> 604).
    #[must_use]
    pub const fn numeric(&self) -> u16 {
        match self {
            Self::ConfigNotFound => 301,
            Self::ConfigInvalid => 302,

            Self::StorageReadError => 601,
            Self::StorageContention => 602,
            Self::ConsistencyViolation => 603,
            Self::DatabaseError => 604,
            Self::SerializationError => 605,

            Self::RetriesExhausted => 701,

            Self::InvalidTransactionState => 801,
            Self::InvalidArgument => 802,

            Self::NotFound => 905,
            Self::IoError => 906,
        }
    }

    /// Get the error code as a formatted string (e.g., "E604").
    #[must_use]
    pub fn code_string(&self) -> String {
        format!("E{}", self.numeric())
    }

    /// Get the default suggestion for this error code.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::ConfigNotFound => "Pass --config <path> or set MSGSTORE_CONFIG",
            Self::ConfigInvalid => "Check TOML syntax and value ranges in the config file",
            Self::StorageReadError => "Check file permissions and ensure the store path is accessible",
            Self::StorageContention => "Another writer holds the store; the operation can be retried",
            Self::ConsistencyViolation => "The store disagrees with the broker's view. Inspect it with `msgstore status` before restarting",
            Self::DatabaseError => "Check that the store file is a msgstore database and is not corrupted",
            Self::SerializationError => "Stored header bytes could not be decoded; the row may be corrupted",
            Self::RetriesExhausted => "Contention persisted across every retry. Check for long-running writers",
            Self::InvalidTransactionState => "Drive the transaction through prepare/commit/rollback in order",
            Self::InvalidArgument => "Check the command arguments",
            Self::NotFound => "Run `msgstore prepared` to list transactions still awaiting resolution",
            Self::IoError => "Check file permissions and disk space",
        }
    }

    /// Check if this error is potentially recoverable by the caller.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::ConfigNotFound
            | Self::ConfigInvalid
            | Self::StorageReadError
            | Self::StorageContention
            | Self::InvalidTransactionState
            | Self::InvalidArgument
            | Self::NotFound
            | Self::IoError => true,

            Self::ConsistencyViolation
            | Self::DatabaseError
            | Self::SerializationError
            | Self::RetriesExhausted => false,
        }
    }

    /// Get the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match self.numeric() / 100 {
            3 => "config",
            6 => "storage",
            7 => "paging",
            8 => "transaction",
            9 => "internal",
            _ => "unknown",
        }
    }

    /// Iterate over all error codes.
    pub fn all() -> impl Iterator<Item = Self> {
        [
            Self::ConfigNotFound,
            Self::ConfigInvalid,
            Self::StorageReadError,
            Self::StorageContention,
            Self::ConsistencyViolation,
            Self::DatabaseError,
            Self::SerializationError,
            Self::RetriesExhausted,
            Self::InvalidTransactionState,
            Self::InvalidArgument,
            Self::NotFound,
            Self::IoError,
        ]
        .into_iter()
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code_string())
    }
}
