//! Messages and their shared, reference-counted handles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Result, StoreError};

/// Cluster-unique message identity.
pub type MessageId = i64;

/// A single typed header value.
///
/// Floats are stored by their bit pattern, so infinities and NaN payloads
/// read back exactly.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum HeaderValue {
    Bool(bool),
    Int(i64),
    Float(#[serde(with = "float_bits")] f64),
    Text(String),
    Bytes(Vec<u8>),
}

impl PartialEq for HeaderValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.to_bits() == b.to_bits(),
            (Self::Text(a), Self::Text(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            _ => false,
        }
    }
}

mod float_bits {
    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::trivially_copy_pass_by_ref)]
    pub fn serialize<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.to_bits())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
        u64::deserialize(deserializer).map(f64::from_bits)
    }
}

/// Opaque header mapping carried by every message.
pub type Headers = BTreeMap<String, HeaderValue>;

/// Immutable message contents as persisted in the message table.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub reliable: bool,
    /// Expiration time in epoch milliseconds, 0 for never.
    pub expiration: i64,
    /// Creation time in epoch milliseconds.
    pub timestamp: i64,
    pub priority: u8,
    pub headers: Headers,
    pub payload: Option<Vec<u8>>,
}

impl Message {
    /// Default JMS-style priority.
    pub const DEFAULT_PRIORITY: u8 = 4;

    /// Create a message stamped with the current time.
    pub fn new(id: MessageId, reliable: bool) -> Self {
        Self {
            id,
            reliable,
            expiration: 0,
            timestamp: chrono::Utc::now().timestamp_millis(),
            priority: Self::DEFAULT_PRIORITY,
            headers: Headers::new(),
            payload: None,
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Some(payload.into());
        self
    }

    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: HeaderValue) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_expiration(mut self, expiration: i64) -> Self {
        self.expiration = expiration;
        self
    }
}

/// Encode headers for storage. An empty map is stored as NULL.
pub fn encode_headers(headers: &Headers) -> Result<Option<Vec<u8>>> {
    if headers.is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::to_vec(headers)?))
}

/// Decode stored header bytes; NULL decodes to an empty map.
pub fn decode_headers(bytes: Option<&[u8]>) -> Result<Headers> {
    match bytes {
        None => Ok(Headers::new()),
        Some(bytes) => Ok(serde_json::from_slice(bytes)?),
    }
}

/// A message shared by every channel that references it.
///
/// The persistent channel count is readable by anyone. It is only changed by
/// the reference ledger and transaction coordinator while the message's lock
/// is held, through [`CountChanges`](crate::storage::CountChanges).
#[derive(Debug)]
pub struct StoredMessage {
    message: Message,
    channel_count: AtomicU32,
}

/// Canonical shared handle to a stored message.
pub type MessageHandle = Arc<StoredMessage>;

impl StoredMessage {
    pub(crate) fn new(message: Message, channel_count: u32) -> Self {
        Self {
            message,
            channel_count: AtomicU32::new(channel_count),
        }
    }

    pub fn id(&self) -> MessageId {
        self.message.id
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    /// Number of channels holding a committed (or prepared) reference.
    pub fn persistent_channel_count(&self) -> u32 {
        self.channel_count.load(Ordering::SeqCst)
    }

    pub(crate) fn increment_count(&self) -> u32 {
        self.channel_count.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn decrement_count(&self) -> Result<u32> {
        self.channel_count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |count| {
                count.checked_sub(1)
            })
            .map(|previous| previous - 1)
            .map_err(|_| {
                StoreError::Consistency(format!(
                    "persistent channel count of message {} would drop below zero",
                    self.id()
                ))
            })
    }
}
