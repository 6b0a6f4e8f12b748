//! Channel references to messages and their loadable projections.

use serde::{Deserialize, Serialize};

use super::message::{MessageHandle, MessageId};
use crate::error::{Result, StoreError};

/// Channel identity.
pub type ChannelId = i64;

/// Transactional state of a persisted reference row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RefState {
    Committed,
    PendingAdd,
    PendingRemove,
}

impl RefState {
    pub const fn as_code(self) -> &'static str {
        match self {
            Self::Committed => "C",
            Self::PendingAdd => "+",
            Self::PendingRemove => "-",
        }
    }

    pub fn from_code(code: &str) -> Result<Self> {
        match code {
            "C" => Ok(Self::Committed),
            "+" => Ok(Self::PendingAdd),
            "-" => Ok(Self::PendingRemove),
            other => Err(StoreError::Consistency(format!(
                "unknown reference state '{other}'"
            ))),
        }
    }
}

/// A channel's claim on a message.
#[derive(Debug, Clone)]
pub struct MessageReference {
    pub message: MessageHandle,
    pub delivery_count: i32,
    pub paging_order: Option<i64>,
    pub reliable: bool,
}

impl MessageReference {
    /// Reference a message; reliability is copied from the message.
    pub fn new(message: MessageHandle) -> Self {
        let reliable = message.message().reliable;
        Self {
            message,
            delivery_count: 0,
            paging_order: None,
            reliable,
        }
    }

    #[must_use]
    pub const fn with_paging_order(mut self, order: i64) -> Self {
        self.paging_order = Some(order);
        self
    }

    #[must_use]
    pub const fn with_delivery_count(mut self, count: i32) -> Self {
        self.delivery_count = count;
        self
    }

    pub fn message_id(&self) -> MessageId {
        self.message.id()
    }
}

/// What a channel needs to rebuild a reference from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceInfo {
    pub message_id: MessageId,
    pub delivery_count: i32,
    pub reliable: bool,
}

/// Inclusive range of paging ordinals held by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagingWindow {
    pub min: i64,
    pub max: i64,
}

impl PagingWindow {
    pub const fn len(self) -> i64 {
        self.max - self.min + 1
    }

    pub const fn is_empty(self) -> bool {
        self.max < self.min
    }
}

/// Result of reconciling a channel's unpaged window at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InitialLoadInfo {
    pub window: Option<PagingWindow>,
    pub refs: Vec<ReferenceInfo>,
}

impl InitialLoadInfo {
    pub fn min_page_ordering(&self) -> Option<i64> {
        self.window.map(|w| w.min)
    }

    pub fn max_page_ordering(&self) -> Option<i64> {
        self.window.map(|w| w.max)
    }
}
