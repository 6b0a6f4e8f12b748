//! Journal of in-memory channel count mutations.

use tracing::warn;

use crate::core::MessageHandle;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Delta {
    Increment,
    Decrement,
}

/// Every count change applied during one write, so a failed write can put
/// the in-memory counts back before its locks are released.
#[derive(Debug, Default)]
#[must_use = "a failed write must undo its count changes"]
pub struct CountChanges {
    applied: Vec<(MessageHandle, Delta)>,
}

impl CountChanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment and return the new count.
    pub(crate) fn increment(&mut self, handle: &MessageHandle) -> u32 {
        let count = handle.increment_count();
        self.applied.push((MessageHandle::clone(handle), Delta::Increment));
        count
    }

    /// Decrement and return the new count. Fails without recording anything
    /// if the count is already 0.
    pub(crate) fn decrement(&mut self, handle: &MessageHandle) -> Result<u32> {
        let count = handle.decrement_count()?;
        self.applied.push((MessageHandle::clone(handle), Delta::Decrement));
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    /// Reverse every recorded change, newest first.
    pub fn undo(self) {
        for (handle, delta) in self.applied.into_iter().rev() {
            match delta {
                Delta::Increment => {
                    if let Err(err) = handle.decrement_count() {
                        warn!(message = handle.id(), error = %err, "could not undo count increment");
                    }
                }
                Delta::Decrement => {
                    handle.increment_count();
                }
            }
        }
    }
}
