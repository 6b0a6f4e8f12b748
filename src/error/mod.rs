//! Error handling for msgstore.
//!
//! This module provides:
//! - [`StoreError`]: The main error enum for all store operations
//! - [`ErrorCode`]: Standardized error codes for machine parsing
//! - [`StructuredError`]: Serializable error report for JSON output

mod codes;

use std::io;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub use codes::ErrorCode;

/// Main error type for store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Backend contention: {0}")]
    Contention(String),

    #[error("Consistency violation: {0}")]
    Consistency(String),

    #[error("{operation} failed after {attempts} attempts")]
    RetriesExhausted { operation: String, attempts: u32 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Transaction {id} is {state}, cannot {action}")]
    InvalidTransactionState {
        id: i64,
        state: String,
        action: String,
    },

    #[error("Not found: {0}")]
    NotFound(String),
}

impl StoreError {
    /// Get the error code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Database(_) if self.is_transient() => ErrorCode::StorageContention,
            Self::Database(_) => ErrorCode::DatabaseError,
            Self::Io(_) => ErrorCode::IoError,
            Self::Json(_) => ErrorCode::SerializationError,
            Self::Config(_) => ErrorCode::ConfigInvalid,
            Self::Contention(_) => ErrorCode::StorageContention,
            Self::Consistency(_) => ErrorCode::ConsistencyViolation,
            Self::RetriesExhausted { .. } => ErrorCode::RetriesExhausted,
            Self::InvalidArgument(_) => ErrorCode::InvalidArgument,
            Self::InvalidTransactionState { .. } => ErrorCode::InvalidTransactionState,
            Self::NotFound(_) => ErrorCode::NotFound,
        }
    }

    /// Whether the backend rejected the work because of contention with
    /// another writer (busy/locked/deadlock). Only these are ever retried.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Contention(_) => true,
            Self::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }

    /// Get context information for this error as JSON.
    #[must_use]
    pub fn context(&self) -> Option<Value> {
        match self {
            Self::RetriesExhausted {
                operation,
                attempts,
            } => Some(serde_json::json!({ "operation": operation, "attempts": attempts })),
            Self::InvalidTransactionState { id, state, action } => Some(
                serde_json::json!({ "transaction_id": id, "state": state, "action": action }),
            ),
            _ => None,
        }
    }

    /// Convert this error to a structured error.
    #[must_use]
    pub fn to_structured(&self) -> StructuredError {
        StructuredError::from_store_error(self)
    }
}

/// A structured error with machine-readable code, suggestion, and context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredError {
    /// The error code (e.g., "CONSISTENCY_VIOLATION")
    pub code: ErrorCode,

    /// The numeric error code (e.g., 603)
    pub numeric_code: u16,

    /// Human-readable error message
    pub message: String,

    /// Actionable suggestion for recovery
    pub suggestion: String,

    /// Additional context for debugging
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,

    /// Whether this error is potentially recoverable by the caller
    pub recoverable: bool,

    /// Error category (e.g., "storage", "paging")
    pub category: String,
}

impl StructuredError {
    /// Create a new structured error.
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            numeric_code: code.numeric(),
            suggestion: code.suggestion().to_string(),
            context: None,
            recoverable: code.is_recoverable(),
            category: code.category().to_string(),
            code,
            message: message.into(),
        }
    }

    /// Create a structured error from a `StoreError`.
    #[must_use]
    pub fn from_store_error(err: &StoreError) -> Self {
        let mut structured = Self::new(err.code(), err.to_string());
        structured.context = err.context();
        structured
    }
}

impl std::fmt::Display for StructuredError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl From<&StoreError> for StructuredError {
    fn from(err: &StoreError) -> Self {
        Self::from_store_error(err)
    }
}

/// Result type alias using `StoreError`.
pub type Result<T> = std::result::Result<T, StoreError>;
