//! Canonical in-memory message handles.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::core::{Message, MessageHandle, MessageId, StoredMessage};

/// Weak map from message id to the live handle for that message.
///
/// While any component holds a handle, every lookup for the same id returns
/// that same handle, so all of them observe one channel count.
#[derive(Debug, Default)]
pub struct MessageRegistry {
    live: Mutex<HashMap<MessageId, Weak<StoredMessage>>>,
}

impl MessageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live handle for the id, or a new one seeded from stored state.
    pub(crate) fn intern(&self, message: Message, channel_count: u32) -> MessageHandle {
        let mut live = self.live.lock();
        if let Some(existing) = live.get(&message.id).and_then(Weak::upgrade) {
            return existing;
        }
        let id = message.id;
        let handle = Arc::new(StoredMessage::new(message, channel_count));
        live.insert(id, Arc::downgrade(&handle));
        if live.len() > 1024 && live.len().is_power_of_two() {
            live.retain(|_, weak| weak.strong_count() > 0);
        }
        handle
    }

    pub fn get(&self, id: MessageId) -> Option<MessageHandle> {
        self.live.lock().get(&id).and_then(Weak::upgrade)
    }

    /// Number of handles still alive.
    pub fn live_count(&self) -> usize {
        self.live
            .lock()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }
}
